//! Pulls the container model out of the map page.
//!
//! The page embeds the data as a JavaScript assignment inside the script of
//! the `#MapPartial` element:
//!
//! ```text
//! var oContainerModel =[{"sRegistrationNumber":"X1", ...}];
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{ContainerDataset, RawContainerRecord, RegistrationId};
use crate::ports::{ParseError, RecordError};

static MAP_PARTIAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#MapPartial").expect("static selector"));

static SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("static selector"));

// An explicitly empty model is accepted as well, it means no containers are reported.
static CONTAINER_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"var oContainerModel =(\[\{.*?\}\]|\[\s*\]);").expect("static pattern")
});

static DATE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Date\((.*?)\)").expect("static pattern"));

/// Single entry of `oContainerModel`.
///
/// Fields stay untyped so one oddly typed value only affects its own record.
#[derive(Debug, Deserialize)]
struct WireContainer {
    #[serde(rename = "sRegistrationNumber", default)]
    registration_number: Option<Value>,

    #[serde(rename = "dFillingDegree", default)]
    filling_degree: Option<Value>,

    #[serde(rename = "bIsOutOfUse", default)]
    is_out_of_use: Option<Value>,

    // e.g. "/Date(1700000000000)/"
    #[serde(rename = "dtDateLastEmptied", default)]
    date_last_emptied: Option<Value>,

    #[serde(rename = "sProductName", default)]
    product_name: Option<Value>,
    // coordinates and address fields exist too, nothing here needs them
}

/// Decode the page into a dataset keyed by registration number.
///
/// When the same registration number occurs more than once, the last
/// occurrence in array order wins. Problems confined to one record are kept
/// as [`RecordError`] diagnostics: a wrongly typed field falls back to its
/// default, an undecodable last-emptied value leaves `last_emptied` unset, and
/// a record without a registration number is skipped.
///
/// # Errors
///
/// Returns a [`ParseError`] when the script, the payload, or a JSON array is missing.
pub fn extract(page: &str) -> Result<ContainerDataset, ParseError> {
    let script = script_text(page)?;

    let payload = CONTAINER_MODEL
        .captures(&script)
        .and_then(|captures| captures.get(1))
        .ok_or(ParseError::PayloadNotFound)?;

    let containers = serde_json::from_str::<Vec<Value>>(payload.as_str())?;

    Ok(build_dataset(containers))
}

fn script_text(page: &str) -> Result<String, ParseError> {
    let document = Html::parse_document(page);

    let map_partial = document
        .select(&MAP_PARTIAL)
        .next()
        .ok_or(ParseError::ScriptNotFound)?;
    let script = map_partial
        .select(&SCRIPT)
        .next()
        .ok_or(ParseError::ScriptNotFound)?;

    Ok(script.text().collect())
}

fn build_dataset(containers: Vec<Value>) -> ContainerDataset {
    let mut records = HashMap::with_capacity(containers.len());
    let mut diagnostics = Vec::new();

    for (index, value) in containers.into_iter().enumerate() {
        let Some((container, registration_id)) = identify(value) else {
            let problem = RecordError::MissingRegistration { index };
            warn!(%problem, "skipping container record");
            diagnostics.push(problem);
            continue;
        };

        let mut decoder = RecordDecoder {
            registration_id: &registration_id,
            diagnostics: &mut diagnostics,
        };
        let fill_degree = decoder
            .field("dFillingDegree", container.filling_degree, Value::as_f64)
            .unwrap_or_default();
        let out_of_use = decoder
            .field("bIsOutOfUse", container.is_out_of_use, Value::as_bool)
            .unwrap_or_default();
        let product_name = decoder
            .field("sProductName", container.product_name, |value| {
                value.as_str().map(str::to_owned)
            })
            .unwrap_or_default();
        let last_emptied = decoder.last_emptied(container.date_last_emptied);

        let record = RawContainerRecord {
            registration_id: registration_id.clone(),
            fill_degree,
            out_of_use,
            last_emptied,
            product_name,
        };

        if records.insert(registration_id, record).is_some() {
            debug!("duplicate registration number, keeping the later entry");
        }
    }

    debug!(
        containers = records.len(),
        problems = diagnostics.len(),
        "extracted container model"
    );

    ContainerDataset::new(records, diagnostics)
}

/// Wire record plus its registration number, `None` when the entry has no string id.
fn identify(value: Value) -> Option<(WireContainer, RegistrationId)> {
    let container = serde_json::from_value::<WireContainer>(value).ok()?;
    let Some(Value::String(raw)) = &container.registration_number else {
        return None;
    };
    let registration_id = RegistrationId(raw.clone());
    Some((container, registration_id))
}

/// Decodes the fields of one record, collecting its problems.
struct RecordDecoder<'record> {
    registration_id: &'record RegistrationId,
    diagnostics: &'record mut Vec<RecordError>,
}

impl RecordDecoder<'_> {
    /// Absent and `null` values are silently `None`; any other value `decode` rejects is reported.
    fn field<T>(
        &mut self,
        field: &'static str,
        value: Option<Value>,
        decode: impl FnOnce(&Value) -> Option<T>,
    ) -> Option<T> {
        let value = value.filter(|value| !value.is_null())?;
        let decoded = decode(&value);
        if decoded.is_none() {
            let problem = RecordError::BadField {
                registration_id: self.registration_id.clone(),
                field,
            };
            warn!(%problem, %value, "using the default instead");
            self.diagnostics.push(problem);
        }
        decoded
    }

    fn last_emptied(&mut self, value: Option<Value>) -> Option<DateTime<Utc>> {
        let raw = match value {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw),
            Some(other) => Some(other.to_string()),
        };

        let last_emptied = decode_last_emptied(raw.as_deref());
        if last_emptied.is_none() {
            let problem = RecordError::BadTimestamp {
                registration_id: self.registration_id.clone(),
                raw,
            };
            warn!(%problem, "keeping container without last-emptied time");
            self.diagnostics.push(problem);
        }
        last_emptied
    }
}

fn decode_last_emptied(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let literal = raw?;
    let millis = DATE_LITERAL
        .captures(literal)?
        .get(1)?
        .as_str()
        .trim()
        .parse::<i64>()
        .ok()?;
    DateTime::from_timestamp_millis(millis)
}
