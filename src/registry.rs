use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::{config::ModelConfig, sampler::SamplingType, GenieError, Result};

const BASE_PATH: &str = "https://storage.googleapis.com/magentadata/js/checkpoints/piano_genie/";

pub const DEFAULT_CFG_NAME: &str = "epiano_stp_iq_auto_contour_dt";

/// Knobs a performer may change while playing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParameters {
    pub look_ahead: bool,
    pub sampling_type: SamplingType,
    /// 0 is greedy, 1 is the plain model distribution
    pub categorical_temperature: f32,
    pub neural_cache_theta: f32,
    /// weight of the cache distribution when blending
    pub cache_lambda: f32,
}

impl UserParameters {
    pub const CATEGORICAL: Self = Self {
        look_ahead: true,
        sampling_type: SamplingType::Categorical,
        categorical_temperature: 0.25,
        neural_cache_theta: 0.0,
        cache_lambda: 0.0,
    };

    pub const CATEGORICAL_DELTA_TIME: Self = Self {
        look_ahead: false,
        ..Self::CATEGORICAL
    };

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.categorical_temperature) {
            return Err(GenieError::InvalidParameter {
                name: "categorical_temperature",
                value: self.categorical_temperature,
            });
        }
        if !unit.contains(&self.cache_lambda) {
            return Err(GenieError::InvalidParameter {
                name: "cache_lambda",
                value: self.cache_lambda,
            });
        }
        if !(self.neural_cache_theta >= 0.0 && self.neural_cache_theta.is_finite()) {
            return Err(GenieError::InvalidParameter {
                name: "neural_cache_theta",
                value: self.neural_cache_theta,
            });
        }
        Ok(())
    }
}

/// A selectable model: checkpoint location, topology and defaults.
#[derive(Debug, Clone)]
pub struct GenieConfig {
    pub key: &'static str,
    pub name: &'static str,
    pub uri: String,
    pub model_cfg: ModelConfig,
    pub default_user_parameters: UserParameters,
}

fn entry(
    key: &'static str,
    name: &'static str,
    checkpoint: &str,
    model_cfg: ModelConfig,
    default_user_parameters: UserParameters,
) -> GenieConfig {
    GenieConfig {
        key,
        name,
        uri: format!("{BASE_PATH}model/epiano/{checkpoint}"),
        model_cfg,
        default_user_parameters,
    }
}

/// Every known configuration, in display order.
pub fn all_configs() -> &'static [GenieConfig] {
    static CONFIGS: OnceLock<Vec<GenieConfig>> = OnceLock::new();
    CONFIGS.get_or_init(|| {
        use UserParameters as P;
        vec![
            entry(
                "epiano_auto_no_enc",
                "Autoregressive",
                "auto_no_enc_483027",
                ModelConfig::auto_no_enc().fused(),
                P::CATEGORICAL,
            ),
            entry(
                "epiano_auto_no_enc_dt",
                "Autoregressive + Delta Time",
                "auto_no_enc_dt_516217",
                ModelConfig::auto_no_enc_dt().fused(),
                P::CATEGORICAL_DELTA_TIME,
            ),
            entry(
                "epiano_stp_vq_auto",
                "Step VQ-VAE + Autoregression",
                "stp_vq4_auto_380486",
                ModelConfig::stp_vq_auto().fused(),
                P::CATEGORICAL,
            ),
            entry(
                "epiano_stp_vq_auto_dt",
                "Step VQ-VAE + Autoregression + Delta Time",
                "stp_vq4_auto_dt_337481",
                ModelConfig::stp_vq_auto_dt().fused(),
                P::CATEGORICAL_DELTA_TIME,
            ),
            entry(
                "epiano_stp_iq_auto",
                "Step IQ + Autoregression",
                "stp_iq_auto_394598",
                ModelConfig::stp_iq_auto().fused(),
                P::CATEGORICAL,
            ),
            entry(
                "epiano_stp_iq_auto_contour",
                "Step IQ + Autoregression + Contour",
                "stp_iq_auto_contour_175255",
                ModelConfig::stp_iq_auto().fused(),
                P::CATEGORICAL,
            ),
            entry(
                "epiano_stp_iq_auto_contour_dt",
                "Step IQ + Autoregression + Contour + Delta Time",
                "stp_iq_auto_contour_dt_166006",
                ModelConfig::stp_iq_auto_dt().fused(),
                P::CATEGORICAL_DELTA_TIME,
            ),
        ]
    })
}

pub fn get_config(key: &str) -> Result<&'static GenieConfig> {
    all_configs()
        .iter()
        .find(|cfg| cfg.key == key)
        .ok_or_else(|| GenieError::UnknownConfig(key.to_string()))
}

pub fn default_config() -> &'static GenieConfig {
    let configs = all_configs();
    configs
        .iter()
        .find(|cfg| cfg.key == DEFAULT_CFG_NAME)
        .unwrap_or(&configs[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = get_config(DEFAULT_CFG_NAME).unwrap();
        assert_eq!(cfg.key, default_config().key);
        assert!(cfg.model_cfg.uses_delta_time());
        assert!(!cfg.default_user_parameters.look_ahead);
        assert_eq!(cfg.model_cfg.num_buttons(), 8);
        assert!(cfg.uri.ends_with("stp_iq_auto_contour_dt_166006"));
    }

    #[test]
    fn test_delta_time_configs_never_look_ahead() {
        assert_eq!(all_configs().len(), 7);
        for cfg in all_configs() {
            assert!(cfg.model_cfg.num_buttons() > 0, "{}", cfg.key);
            if cfg.model_cfg.uses_delta_time() {
                assert!(!cfg.default_user_parameters.look_ahead, "{}", cfg.key);
            }
        }
    }

    #[test]
    fn test_unknown_config() {
        assert!(matches!(
            get_config("harpsichord"),
            Err(GenieError::UnknownConfig(_))
        ));
    }

    #[test]
    fn test_user_parameters_json() {
        let json = r#"{
            "lookAhead": false,
            "samplingType": "neural_cache",
            "categoricalTemperature": 0.5,
            "neuralCacheTheta": 2.0,
            "cacheLambda": 0.3
        }"#;
        let params: UserParameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.sampling_type, SamplingType::NeuralCache);
        params.validate().unwrap();

        let bad = UserParameters {
            cache_lambda: 1.5,
            ..params
        };
        assert!(matches!(
            bad.validate(),
            Err(GenieError::InvalidParameter { name: "cache_lambda", .. })
        ));
        assert!(serde_json::from_str::<UserParameters>(
            &json.replace("neural_cache", "beam")
        )
        .is_err());
    }
}
