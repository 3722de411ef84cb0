use std::env;
use std::error;
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;

/// Exits non-zero unless the URL answers 2xx with `"success": true`.
fn main() -> Result<(), Box<dyn error::Error>> {
    let args: Vec<String> = env::args().collect();
    let url = match args.get(1) {
        Some(url) => Url::parse(url)?,
        None => Url::parse("http://127.0.0.1:5000/api/health")?,
    };

    let response = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?
        .get(url)
        .send()?;
    if !response.status().is_success() {
        return Err(format!("Health check failed with status {}", response.status()).into());
    }

    let body: Value = response.json()?;
    if body["success"] != Value::Bool(true) {
        return Err(format!("Service reported unhealthy: {}", body).into());
    }
    Ok(())
}
