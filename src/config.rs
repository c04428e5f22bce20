/// Number of output classes, one per piano key.
pub const NUM_PITCHES: usize = 88;
/// MIDI note of output class 0 (A0).
pub const LOWEST_MIDI_NOTE: u8 = 21;
/// Previous-output value fed before anything was played.
pub const START_SENTINEL: i32 = -1;
/// Delta-time buckets per second.
pub const DELTA_TIME_RATE: f32 = 31.25;

/// Decoder topology. The flags select which features are concatenated into
/// the recurrent input at each step.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub max_discrete_times: usize,
    pub rnn_layers: usize,
    pub rnn_units: usize,
    /// Every layer reads the weights of `cell_0`.
    pub single_layer_legacy: bool,
    /// Checkpoint stores `basic_lstm_cell` rather than `lstm_cell`.
    pub unfused_legacy: bool,
    /// Vector-quantized step embedding, `Some(codebook_size)`.
    pub vq: Option<usize>,
    /// Interval-quantized step embedding, `Some(num_bins)`.
    pub iq: Option<usize>,
    pub autoregressive: bool,
    pub delta_times: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_discrete_times: 32,
            rnn_layers: 2,
            rnn_units: 128,
            single_layer_legacy: false,
            unfused_legacy: true,
            vq: None,
            iq: None,
            autoregressive: false,
            delta_times: false,
        }
    }
}

impl ModelConfig {
    pub fn stp_vq_legacy() -> Self {
        Self {
            single_layer_legacy: true,
            vq: Some(8),
            ..Self::default()
        }
    }

    pub fn auto_no_enc() -> Self {
        Self {
            autoregressive: true,
            ..Self::default()
        }
    }

    pub fn auto_no_enc_dt() -> Self {
        Self {
            delta_times: true,
            ..Self::auto_no_enc()
        }
    }

    pub fn stp_vq() -> Self {
        Self {
            vq: Some(8),
            ..Self::default()
        }
    }

    pub fn stp_vq_auto() -> Self {
        Self {
            autoregressive: true,
            ..Self::stp_vq()
        }
    }

    pub fn stp_vq_auto_dt() -> Self {
        Self {
            delta_times: true,
            ..Self::stp_vq_auto()
        }
    }

    pub fn stp_iq() -> Self {
        Self {
            iq: Some(8),
            ..Self::default()
        }
    }

    pub fn stp_iq_auto() -> Self {
        Self {
            autoregressive: true,
            ..Self::stp_iq()
        }
    }

    pub fn stp_iq_auto_dt() -> Self {
        Self {
            delta_times: true,
            ..Self::stp_iq_auto()
        }
    }

    /// Checkpoint uses fused `lstm_cell` variables.
    pub fn fused(mut self) -> Self {
        self.unfused_legacy = false;
        self
    }

    pub fn with_rnn_dims(mut self, layers: usize, units: usize) -> Self {
        self.rnn_layers = layers;
        self.rnn_units = units;
        self
    }

    /// Overrides the bin count of an interval-quantized config.
    pub fn with_iq_bins(mut self, bins: usize) -> Self {
        if self.iq.is_some() {
            self.iq = Some(bins);
        }
        self
    }

    pub fn num_buttons(&self) -> usize {
        let mut num_buttons = self.vq.unwrap_or(0) + self.iq.unwrap_or(0);
        if num_buttons == 0 && self.autoregressive {
            num_buttons = 1;
        }
        num_buttons
    }

    pub fn uses_delta_time(&self) -> bool {
        self.delta_times
    }

    /// Width of the autoregressive one-hot (every pitch plus the start class).
    pub fn autoregressive_classes(&self) -> usize {
        NUM_PITCHES + 1
    }

    /// Width of the delta-time one-hot.
    pub fn delta_time_classes(&self) -> usize {
        self.max_discrete_times + 1
    }

    /// Width of the concatenated decoder features, excluding the VQ
    /// embedding whose size comes from the checkpoint.
    pub(crate) fn fixed_feature_width(&self) -> usize {
        let mut width = 0;
        if self.iq.is_some() {
            width += 1;
        }
        if self.autoregressive {
            width += self.autoregressive_classes();
        }
        if self.delta_times {
            width += self.delta_time_classes();
        }
        width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_buttons() {
        assert_eq!(ModelConfig::default().num_buttons(), 0);
        assert_eq!(ModelConfig::auto_no_enc().num_buttons(), 1);
        assert_eq!(ModelConfig::auto_no_enc_dt().num_buttons(), 1);
        assert_eq!(ModelConfig::stp_vq().num_buttons(), 8);
        assert_eq!(ModelConfig::stp_vq_auto_dt().num_buttons(), 8);
        assert_eq!(ModelConfig::stp_iq_auto().with_iq_bins(4).num_buttons(), 4);

        let both = ModelConfig {
            vq: Some(6),
            iq: Some(4),
            autoregressive: true,
            ..ModelConfig::default()
        };
        assert_eq!(both.num_buttons(), 10);
    }

    #[test]
    fn test_builders() {
        let cfg = ModelConfig::stp_iq_auto_dt().fused().with_rnn_dims(1, 16);
        assert!(!cfg.unfused_legacy);
        assert!(cfg.uses_delta_time());
        assert_eq!((cfg.rnn_layers, cfg.rnn_units), (1, 16));
        assert_eq!(cfg.fixed_feature_width(), 1 + 89 + 33);
        // bins only apply to interval-quantized configs
        assert_eq!(ModelConfig::stp_vq().with_iq_bins(4).iq, None);
    }
}
