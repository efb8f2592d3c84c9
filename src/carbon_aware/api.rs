//! ENTSO-E transparency platform integration

use crate::carbon_aware::provider::GenerationProvider;
use crate::carbon_aware::types::{CellValue, ColumnLabel, GenerationTable};
use crate::carbon_aware::zones;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://web-api.tp.entsoe.eu/api";

/// Actual generation per production type
const DOCUMENT_TYPE: &str = "A75";
/// Realised
const PROCESS_TYPE: &str = "A16";

const AGGREGATED: &str = "Actual Aggregated";
const CONSUMPTION: &str = "Actual Consumption";

/// Production type names by ENTSO-E `psrType` code
const PSR_TYPES: &[(&str, &str)] = &[
    ("B01", "Biomass"),
    ("B02", "Fossil Brown coal/Lignite"),
    ("B03", "Fossil Coal-derived gas"),
    ("B04", "Fossil Gas"),
    ("B05", "Fossil Hard coal"),
    ("B06", "Fossil Oil"),
    ("B07", "Fossil Oil shale"),
    ("B08", "Fossil Peat"),
    ("B09", "Geothermal"),
    ("B10", "Hydro Pumped Storage"),
    ("B11", "Hydro Run-of-river and poundage"),
    ("B12", "Hydro Water Reservoir"),
    ("B13", "Marine"),
    ("B14", "Nuclear"),
    ("B15", "Other renewable"),
    ("B16", "Solar"),
    ("B17", "Waste"),
    ("B18", "Wind Offshore"),
    ("B19", "Wind Onshore"),
    ("B20", "Other"),
    ("B25", "Energy storage"),
];

fn production_type(code: &str) -> String {
    PSR_TYPES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// ENTSO-E REST API client
#[derive(Clone)]
pub struct EntsoeClient {
    client: Client,
    base_url: String,
    token: String,
}

impl EntsoeClient {
    /// Create a new client; `token` is the security token of the account
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn period(ts: DateTime<Utc>) -> String {
        ts.format("%Y%m%d%H%M").to_string()
    }
}

#[async_trait]
impl GenerationProvider for EntsoeClient {
    async fn query_generation(
        &self,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GenerationTable> {
        let area = zones::area_code(zone_id);
        debug!(
            "Querying ENTSO-E generation for {} ({}) from {} to {}",
            zone_id, area, start, end
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("securityToken", self.token.as_str()),
                ("documentType", DOCUMENT_TYPE),
                ("processType", PROCESS_TYPE),
                ("in_Domain", area.as_str()),
                ("periodStart", Self::period(start).as_str()),
                ("periodEnd", Self::period(end).as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if body.contains("Acknowledgement_MarketDocument") {
            let reason = acknowledgement_reason(&body)
                .ok()
                .flatten()
                .unwrap_or_else(|| "unreadable acknowledgement".to_string());
            return Err(Error::ProviderError(format!(
                "ENTSO-E rejected query ({status}): {reason}"
            )));
        }
        if !status.is_success() {
            return Err(Error::ProviderError(format!("ENTSO-E API error: {status}")));
        }

        let table = parse_generation_document(&body)?;
        info!(
            "Fetched {} generation rows for zone {} from ENTSO-E",
            table.len(),
            zone_id
        );
        Ok(table)
    }

    fn name(&self) -> &str {
        "ENTSO-E"
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SeriesState {
    psr_type: Option<String>,
    consumption: bool,
    curve_type: Option<String>,
    periods: Vec<PeriodState>,
}

#[derive(Default)]
struct PeriodState {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    resolution: Option<Duration>,
    points: Vec<(u32, CellValue)>,
}

#[derive(Default)]
struct PointState {
    position: Option<u32>,
    quantity: Option<CellValue>,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::ParseError(format!("invalid timestamp '{raw}': {e}")))
}

/// Parse an ISO 8601 resolution such as `PT15M`, `PT60M` or `PT1H`.
///
/// Only strictly positive resolutions are accepted.
fn parse_resolution(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let invalid = || Error::ParseError(format!("unsupported resolution '{raw}'"));
    let amount = |digits: &str| -> Result<i64> {
        digits
            .parse::<i64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(invalid)
    };
    let body = raw.strip_prefix("PT").ok_or_else(invalid)?;
    if let Some(minutes) = body.strip_suffix('M') {
        return Duration::try_minutes(amount(minutes)?).ok_or_else(invalid);
    }
    if let Some(hours) = body.strip_suffix('H') {
        return Duration::try_hours(amount(hours)?).ok_or_else(invalid);
    }
    Err(invalid())
}

/// Reason text of an `Acknowledgement_MarketDocument`, `None` for any other document
pub fn acknowledgement_reason(xml: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut is_ack = false;
    let mut stack: Vec<String> = Vec::new();
    let mut reasons = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    if name != "Acknowledgement_MarketDocument" {
                        return Ok(None);
                    }
                    is_ack = true;
                }
                stack.push(name);
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let in_reason = stack.len() >= 2 && stack[stack.len() - 2] == "Reason";
                if in_reason && stack.last().map(String::as_str) == Some("text") {
                    reasons.push(t.unescape()?.into_owned());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !is_ack {
        return Ok(None);
    }
    Ok(Some(if reasons.is_empty() {
        "no reason given".to_string()
    } else {
        reasons.join("; ")
    }))
}

/// Parse a `GL_MarketDocument` into a time-indexed table.
///
/// Each time series becomes a compound column `(production type,
/// aggregation)`; series reported on the out-domain are consumption.
pub fn parse_generation_document(xml: &str) -> Result<GenerationTable> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut table = GenerationTable::new();
    let mut stack: Vec<String> = Vec::new();
    let mut series: Option<SeriesState> = None;
    let mut period: Option<PeriodState> = None;
    let mut point: Option<PointState> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    if name != "GL_MarketDocument" {
                        return Err(Error::ParseError(format!(
                            "unexpected document type '{name}'"
                        )));
                    }
                    saw_root = true;
                }
                match name.as_str() {
                    "TimeSeries" => series = Some(SeriesState::default()),
                    "Period" => period = Some(PeriodState::default()),
                    "Point" => point = Some(PointState::default()),
                    "outBiddingZone_Domain.mRID" => {
                        if let Some(s) = series.as_mut() {
                            s.consumption = true;
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                match name.as_str() {
                    "Point" => {
                        if let (Some(p), Some(per)) = (point.take(), period.as_mut()) {
                            match p.position {
                                Some(position) => per
                                    .points
                                    .push((position, p.quantity.unwrap_or(CellValue::Missing))),
                                None => warn!("Skipping ENTSO-E point without position"),
                            }
                        }
                    }
                    "Period" => {
                        if let (Some(per), Some(s)) = (period.take(), series.as_mut()) {
                            s.periods.push(per);
                        }
                    }
                    "TimeSeries" => {
                        if let Some(s) = series.take() {
                            flush_series(&mut table, s)?;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                let current = stack.last().map(String::as_str).unwrap_or_default();
                let parent = if stack.len() >= 2 {
                    stack[stack.len() - 2].as_str()
                } else {
                    ""
                };
                match (parent, current) {
                    ("MktPSRType", "psrType") => {
                        if let Some(s) = series.as_mut() {
                            s.psr_type = Some(text);
                        }
                    }
                    ("TimeSeries", "curveType") => {
                        if let Some(s) = series.as_mut() {
                            s.curve_type = Some(text);
                        }
                    }
                    ("timeInterval", "start") => {
                        if let Some(per) = period.as_mut() {
                            per.start = Some(parse_timestamp(&text)?);
                        }
                    }
                    ("timeInterval", "end") => {
                        if let Some(per) = period.as_mut() {
                            per.end = Some(parse_timestamp(&text)?);
                        }
                    }
                    ("Period", "resolution") => {
                        if let Some(per) = period.as_mut() {
                            per.resolution = Some(parse_resolution(&text)?);
                        }
                    }
                    ("Point", "position") => {
                        if let Some(p) = point.as_mut() {
                            p.position = Some(text.trim().parse().map_err(|_| {
                                Error::ParseError(format!("invalid point position '{text}'"))
                            })?);
                        }
                    }
                    ("Point", "quantity") => {
                        if let Some(p) = point.as_mut() {
                            p.quantity = Some(CellValue::parse(&text));
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::ParseError("empty document".to_string()));
    }
    Ok(table)
}

/// Upper bound on the points of one period: a leap year at 15-minute resolution
const MAX_PERIOD_POINTS: i64 = 366 * 96;

/// Number of `resolution` steps in `[start, end)`, the last one possibly partial
fn period_slots(start: DateTime<Utc>, end: DateTime<Utc>, resolution: Duration) -> Result<u32> {
    let span = (end - start).num_seconds();
    if span <= 0 {
        return Err(Error::ParseError(format!(
            "period ends at {end}, not after its start {start}"
        )));
    }
    let step = resolution.num_seconds();
    let slots = span / step + i64::from(span % step != 0);
    if slots > MAX_PERIOD_POINTS {
        return Err(Error::ParseError(format!(
            "period of {slots} points exceeds {MAX_PERIOD_POINTS}"
        )));
    }
    u32::try_from(slots).map_err(|_| Error::ParseError(format!("invalid period length {slots}")))
}

/// Start of the 1-based `position` within a period
fn slot_start(start: DateTime<Utc>, resolution: Duration, position: u32) -> Result<DateTime<Utc>> {
    position
        .checked_sub(1)
        .and_then(|index| i32::try_from(index).ok())
        .and_then(|index| resolution.checked_mul(index))
        .and_then(|offset| start.checked_add_signed(offset))
        .ok_or_else(|| Error::ParseError(format!("point position {position} out of range")))
}

/// Place the points of one time series on the time axis.
///
/// Curve type `A03` omits points equal to their predecessor; those gaps are
/// filled forward up to the end of the period. Points outside the period
/// are rejected.
fn flush_series(table: &mut GenerationTable, series: SeriesState) -> Result<()> {
    let category = series
        .psr_type
        .as_deref()
        .map(production_type)
        .unwrap_or_else(|| "Unknown".to_string());
    let aggregation = if series.consumption { CONSUMPTION } else { AGGREGATED };
    let label = ColumnLabel::compound(category, aggregation);
    let fill_forward = series.curve_type.as_deref() == Some("A03");

    for mut period in series.periods {
        let start = period
            .start
            .ok_or_else(|| Error::ParseError("period without start".to_string()))?;
        let end = period
            .end
            .ok_or_else(|| Error::ParseError("period without end".to_string()))?;
        let resolution = period
            .resolution
            .ok_or_else(|| Error::ParseError("period without resolution".to_string()))?;
        let slots = period_slots(start, end, resolution)?;
        period.points.sort_by_key(|(position, _)| *position);

        let mut previous: Option<(u32, CellValue)> = None;
        for (position, value) in period.points {
            if position == 0 || position > slots {
                return Err(Error::ParseError(format!(
                    "point position {position} outside period of {slots} points"
                )));
            }
            if fill_forward {
                if let Some((last, last_value)) = &previous {
                    for gap in (last + 1)..position {
                        table.insert(
                            slot_start(start, resolution, gap)?,
                            label.clone(),
                            last_value.clone(),
                        );
                    }
                }
            }
            table.insert(
                slot_start(start, resolution, position)?,
                label.clone(),
                value.clone(),
            );
            previous = Some((position, value));
        }

        if let (true, Some((last, last_value))) = (fill_forward, previous) {
            for gap in (last + 1)..=slots {
                table.insert(
                    slot_start(start, resolution, gap)?,
                    label.clone(),
                    last_value.clone(),
                );
            }
        }
    }
    Ok(())
}
