use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::config::ValidationMode;
use crate::inference::bridge::PredictorError;

/// Weekday names in the order the predictor numbers them, Sunday being 0.
pub const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const FLAG_FIELDS: [&str; 3] = ["hvacUsage", "lightingUsage", "isHoliday"];

/// Feature vector handed to the external predictor.
///
/// Serializes to the camelCase keys the predictor script reads. Fields the
/// bridge does not know about are carried along in `extra`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub temperature: f64,
    pub humidity: f64,
    pub square_footage: f64,
    pub occupancy: f64,
    pub renewable_energy: f64,
    pub hvac_usage: u8,
    pub lighting_usage: u8,
    pub is_holiday: u8,
    pub hour: i64,
    pub day_of_week: i64,
    pub month: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn current_weekday() -> i64 {
    Local::now().weekday().num_days_from_sunday() as i64
}

/// Index of a weekday name, or the current weekday for anything unrecognised.
pub fn day_index(name: &str) -> i64 {
    WEEKDAYS
        .iter()
        .position(|day| *day == name)
        .map_or_else(current_weekday, |idx| idx as i64)
}

/// Rewrites a string day-of-week into its index. Every other value is returned as is.
pub fn normalize_day_of_week(value: Value) -> Value {
    match value {
        Value::String(name) => Value::Number(Number::from(day_index(&name))),
        other => other,
    }
}

/// Coerces the loosely typed fields of a raw request into the shape the
/// predictor expects: weekday names become indices and boolean flags become 0/1.
pub fn normalize(mut fields: Map<String, Value>) -> Map<String, Value> {
    // The dashboard form posts `holiday`, older clients post `isHoliday`.
    if let Some(holiday) = fields.remove("holiday") {
        fields.entry("isHoliday").or_insert(holiday);
    }
    if let Some(day) = fields.remove("dayOfWeek") {
        fields.insert("dayOfWeek".into(), normalize_day_of_week(day));
    }
    for flag in FLAG_FIELDS {
        if let Some(Value::Bool(set)) = fields.get(flag) {
            let set = *set as u8;
            fields.insert(flag.into(), Value::Number(Number::from(set)));
        }
    }
    fields
}

impl PredictionRequest {
    pub fn from_json(body: Value, mode: ValidationMode) -> Result<Self, PredictorError> {
        Self::from_json_at(body, mode, Local::now().naive_local())
    }

    /// Normalizes and validates `body`, taking time based defaults from `now`.
    pub fn from_json_at(
        body: Value,
        mode: ValidationMode,
        now: NaiveDateTime,
    ) -> Result<Self, PredictorError> {
        let fields = match body {
            Value::Object(fields) => fields,
            _ => return Err(invalid("Request body must be a JSON object")),
        };
        let mut fields = FieldReader {
            fields: normalize(fields),
            mode,
        };

        let temperature = fields.number("temperature", 25.0)?;
        if !temperature.is_finite() {
            return Err(invalid("temperature must be a finite number"));
        }
        let humidity = fields.number("humidity", 60.0)?;
        if !(0.0..=100.0).contains(&humidity) {
            return Err(invalid("humidity must be between 0 and 100"));
        }
        let square_footage = fields.number("squareFootage", 1000.0)?;
        if square_footage <= 0.0 {
            return Err(invalid("squareFootage must be greater than 0"));
        }
        let occupancy = fields.number("occupancy", 5.0)?;
        if occupancy < 0.0 {
            return Err(invalid("occupancy must not be negative"));
        }
        let renewable_energy = fields.number("renewableEnergy", 10.0)?;
        if renewable_energy < 0.0 {
            return Err(invalid("renewableEnergy must not be negative"));
        }

        let hvac_usage = fields.flag("hvacUsage")?;
        let lighting_usage = fields.flag("lightingUsage")?;
        let is_holiday = fields.flag("isHoliday")?;

        let hour = fields.clock_field("hour", now.hour() as i64, 0..=23)?;
        let day_of_week = fields.clock_field(
            "dayOfWeek",
            now.weekday().num_days_from_sunday() as i64,
            0..=6,
        )?;
        let month = fields.clock_field("month", now.month() as i64, 1..=12)?;

        Ok(PredictionRequest {
            temperature,
            humidity,
            square_footage,
            occupancy,
            renewable_energy,
            hvac_usage,
            lighting_usage,
            is_holiday,
            hour,
            day_of_week,
            month,
            extra: fields.fields,
        })
    }
}

struct FieldReader {
    fields: Map<String, Value>,
    mode: ValidationMode,
}

impl FieldReader {
    /// Removes `key`, treating JSON null like an absent field.
    fn take(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key).filter(|value| !value.is_null())
    }

    fn missing<T>(&self, key: &str, default: T) -> Result<T, PredictorError> {
        match self.mode {
            ValidationMode::Strict => Err(invalid(format!("{key} is required"))),
            ValidationMode::Fill => Ok(default),
        }
    }

    fn number(&mut self, key: &str, default: f64) -> Result<f64, PredictorError> {
        match self.take(key) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| invalid(format!("{key} must be a number"))),
            Some(_) => Err(invalid(format!("{key} must be a number"))),
            None => self.missing(key, default),
        }
    }

    /// Reads a clock field. Absent values take `now` in every mode.
    fn clock_field(
        &mut self,
        key: &str,
        now: i64,
        range: std::ops::RangeInclusive<i64>,
    ) -> Result<i64, PredictorError> {
        let value = match self.take(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| invalid(format!("{key} must be an integer")))?,
            Some(_) => return Err(invalid(format!("{key} must be an integer"))),
            None => now,
        };
        if !range.contains(&value) {
            return Err(invalid(format!(
                "{key} must be between {} and {}",
                range.start(),
                range.end()
            )));
        }
        Ok(value)
    }

    fn flag(&mut self, key: &str) -> Result<u8, PredictorError> {
        match self.take(key) {
            Some(Value::Number(n)) => match n.as_u64() {
                Some(0) => Ok(0),
                Some(1) => Ok(1),
                _ => Err(invalid(format!("{key} must be a boolean or 0/1"))),
            },
            Some(_) => Err(invalid(format!("{key} must be a boolean or 0/1"))),
            None => self.missing(key, 0),
        }
    }
}

fn invalid(message: impl Into<String>) -> PredictorError {
    PredictorError::Validation(message.into())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn full_request() -> Value {
        json!({
            "temperature": 25,
            "humidity": 60,
            "squareFootage": 1000,
            "occupancy": 5,
            "hvacUsage": true,
            "lightingUsage": true,
            "isHoliday": false,
            "hour": 14,
            "dayOfWeek": "Wednesday",
            "month": 6,
            "renewableEnergy": 10
        })
    }

    fn noon_on_a_tuesday() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn weekday_names_map_to_their_index() {
        for (idx, name) in WEEKDAYS.iter().enumerate() {
            assert_eq!(day_index(name), idx as i64);
            assert_eq!(
                normalize_day_of_week(json!(name)),
                json!(idx as i64),
                "{name}"
            );
        }
    }

    #[test]
    fn unknown_weekday_falls_back_to_today() {
        for name in ["Funday", "wednesday", ""] {
            assert_eq!(day_index(name), current_weekday());
        }
    }

    #[test]
    fn numeric_weekday_passes_through() {
        for value in [json!(0), json!(6), json!(9), json!(-1), json!(2.5)] {
            assert_eq!(normalize_day_of_week(value.clone()), value);
        }
    }

    #[test]
    fn normalize_maps_flags_and_holiday_alias() {
        let fields = json!({
            "hvacUsage": true,
            "lightingUsage": 0,
            "holiday": true,
            "dayOfWeek": "Friday"
        });
        let Value::Object(fields) = fields else {
            unreachable!()
        };
        let normalized = normalize(fields);
        assert_eq!(normalized["hvacUsage"], json!(1));
        assert_eq!(normalized["lightingUsage"], json!(0));
        assert_eq!(normalized["isHoliday"], json!(1));
        assert_eq!(normalized["dayOfWeek"], json!(5));
        assert!(!normalized.contains_key("holiday"));
    }

    #[test]
    fn complete_request_is_accepted_in_strict_mode() {
        let request = PredictionRequest::from_json(full_request(), ValidationMode::Strict).unwrap();
        assert_eq!(request.day_of_week, 3);
        assert_eq!(request.hvac_usage, 1);
        assert_eq!(request.is_holiday, 0);

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["dayOfWeek"], json!(3));
        assert_eq!(encoded["squareFootage"], json!(1000.0));
        assert_eq!(encoded["isHoliday"], json!(0));
    }

    #[test]
    fn strict_mode_names_the_missing_field() {
        let mut body = full_request();
        body.as_object_mut().unwrap().remove("renewableEnergy");
        let err = PredictionRequest::from_json(body, ValidationMode::Strict).unwrap_err();
        assert_eq!(err.to_string(), "renewableEnergy is required");
    }

    #[test]
    fn strict_mode_takes_time_fields_from_clock() {
        let mut body = full_request();
        let fields = body.as_object_mut().unwrap();
        fields.remove("hour");
        fields.remove("dayOfWeek");
        fields.remove("month");

        let request =
            PredictionRequest::from_json_at(body, ValidationMode::Strict, noon_on_a_tuesday())
                .unwrap();
        assert_eq!(request.hour, 12);
        assert_eq!(request.day_of_week, 2);
        assert_eq!(request.month, 3);
    }

    #[test]
    fn fill_mode_uses_defaults_and_clock() {
        let request = PredictionRequest::from_json_at(
            json!({"temperature": 30}),
            ValidationMode::Fill,
            noon_on_a_tuesday(),
        )
        .unwrap();
        assert_eq!(request.temperature, 30.0);
        assert_eq!(request.humidity, 60.0);
        assert_eq!(request.square_footage, 1000.0);
        assert_eq!(request.renewable_energy, 10.0);
        assert_eq!(request.hvac_usage, 0);
        assert_eq!(request.hour, 12);
        assert_eq!(request.day_of_week, 2);
        assert_eq!(request.month, 3);
    }

    #[test]
    fn wrong_types_and_ranges_are_rejected_in_every_mode() {
        let cases = [
            ("temperature", json!("hot"), "temperature must be a number"),
            ("humidity", json!(140), "humidity must be between 0 and 100"),
            ("hour", json!(24), "hour must be between 0 and 23"),
            ("hour", json!(14.5), "hour must be an integer"),
            ("dayOfWeek", json!(7), "dayOfWeek must be between 0 and 6"),
            ("month", json!(0), "month must be between 1 and 12"),
            ("hvacUsage", json!(2), "hvacUsage must be a boolean or 0/1"),
            ("squareFootage", json!(0), "squareFootage must be greater than 0"),
        ];
        for mode in [ValidationMode::Strict, ValidationMode::Fill] {
            for (key, value, message) in &cases {
                let mut body = full_request();
                body[*key] = value.clone();
                let err = PredictionRequest::from_json(body, mode).unwrap_err();
                assert!(matches!(err, PredictorError::Validation(_)));
                assert_eq!(err.to_string(), *message);
            }
        }
    }

    #[test]
    fn unknown_fields_are_forwarded() {
        let mut body = full_request();
        body["dayOfYear"] = json!(160);
        let request = PredictionRequest::from_json(body, ValidationMode::Strict).unwrap();
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["dayOfYear"], json!(160));
    }

    #[test]
    fn non_object_body_is_rejected() {
        let err = PredictionRequest::from_json(json!([1, 2]), ValidationMode::Fill).unwrap_err();
        assert_eq!(err.to_string(), "Request body must be a JSON object");
    }
}
