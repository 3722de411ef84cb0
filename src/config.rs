use anyhow::Result;
use clap::ValueEnum;
use clap_serde_derive::ClapSerde;
use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_JWT_SECRET: &str = "change-me";

#[derive(ClapSerde, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub(crate) address: String,

    /// The port the listener binds to
    #[default(5000)]
    #[arg(short, long, env)]
    pub(crate) port: u16,

    /// Connection string of the SQLite database holding user accounts
    #[default("sqlite://voltiq.db?mode=rwc".to_string())]
    #[arg(long, env)]
    pub(crate) database_url: String,

    /// Whether the server refuses to start without a working database
    #[default(DatabaseMode::Required)]
    #[arg(long, env, value_enum)]
    pub(crate) database_mode: DatabaseMode,

    /// Secret used to sign and verify session tokens
    #[default(DEFAULT_JWT_SECRET.to_string())]
    #[arg(long, env)]
    pub(crate) jwt_secret: String,

    /// Lifetime of an issued session token
    #[default(24)]
    #[arg(long, env)]
    pub(crate) token_ttl_hours: u64,

    /// Which predictor backend serves predictions
    #[default(PredictorKind::Subprocess)]
    #[arg(long, env, value_enum)]
    pub(crate) predictor: PredictorKind,

    /// Interpreter or executable started for every subprocess prediction
    #[default("python".to_string())]
    #[arg(long, env)]
    pub(crate) predictor_program: String,

    /// Script handed to the predictor program before the JSON argument
    #[default("ml/api_bridge.py".to_string())]
    #[arg(long, env)]
    pub(crate) predictor_script: String,

    /// Endpoint of a running prediction service, used by the remote backend
    #[default("http://localhost:5001/predict".to_string())]
    #[arg(long, env)]
    pub(crate) predictor_url: String,

    /// Predictions allowed to run at the same time
    #[default(4)]
    #[arg(long, env)]
    pub(crate) max_concurrent_predictions: usize,

    /// Predictions allowed to wait for a free slot before new ones are rejected
    #[default(32)]
    #[arg(long, env)]
    pub(crate) max_queued_predictions: usize,

    /// Upper bound on a single prediction, after which the predictor is killed
    #[default(30)]
    #[arg(long, env)]
    pub(crate) prediction_timeout_secs: u64,

    /// How missing prediction features are treated
    #[default(ValidationMode::Fill)]
    #[arg(long, env, value_enum)]
    pub(crate) validation_mode: ValidationMode,

    /// OTLP collector endpoint, telemetry export is disabled when empty
    #[default(String::new())]
    #[arg(long, env)]
    pub(crate) otlp_endpoint: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseMode {
    /// Exit when the database cannot be reached or migrated
    Required,
    /// Keep serving predictions and retry the database per request
    Optional,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    /// Spawn the predictor program once per request
    Subprocess,
    /// Forward requests to an already running prediction service
    Remote,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject requests with missing measured features, time fields still default to the clock
    Strict,
    /// Fill every missing feature with its default
    Fill,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<Self> {
        let str = std::fs::read_to_string(path)?;
        let opt: <Config as ClapSerde>::Opt = toml::from_str(&str)?;
        Ok(Config::from(opt))
    }

    /// Whether session tokens are signed with the built-in placeholder secret.
    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.database_mode, DatabaseMode::Required);
        assert_eq!(config.predictor, PredictorKind::Subprocess);
        assert_eq!(config.validation_mode, ValidationMode::Fill);
        assert_eq!(config.max_concurrent_predictions, 4);
        assert!(config.uses_default_jwt_secret());
        assert!(config.otlp_endpoint.is_empty());
    }

    #[test]
    fn toml_overrides_only_listed_fields() {
        let dir = std::env::temp_dir().join(format!("voltiq-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("voltiq.toml");
        std::fs::write(
            &path,
            r#"
port = 6001
validation_mode = "strict"
predictor = "remote"
jwt_secret = "s3cret"
"#,
        )
        .unwrap();

        let config = Config::from_toml(path.to_str().unwrap()).unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.validation_mode, ValidationMode::Strict);
        assert_eq!(config.predictor, PredictorKind::Remote);
        assert!(!config.uses_default_jwt_secret());
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.predictor_program, "python");
    }
}
