use crate::config::{ModelConfig, DELTA_TIME_RATE, START_SENTINEL};
use crate::operator::sigmoid;
use crate::{state::LstmState, tensor::Tensor, weights::Weights, Float, GenieError, Result};

const VQ_EMBEDDING: &str = "phero_model/stp_emb_vq/quantizer/vq_layer/embedding";
const RNN_INPUT_KERNEL: &str = "phero_model/decoder/rnn_input/dense/kernel";
const RNN_INPUT_BIAS: &str = "phero_model/decoder/rnn_input/dense/bias";
const PITCHES_KERNEL: &str = "phero_model/decoder/pitches/dense/kernel";
const PITCHES_BIAS: &str = "phero_model/decoder/pitches/dense/bias";
const FORGET_BIAS: Float = 1.0;

/// Variable prefix of the LSTM cell feeding layer `layer`.
pub fn cell_prefix(cfg: &ModelConfig, layer: usize) -> String {
    let cell_kind = if cfg.unfused_legacy {
        "basic_lstm_cell"
    } else {
        "lstm_cell"
    };
    let cell = if cfg.single_layer_legacy { 0 } else { layer };
    format!("phero_model/decoder/rnn/rnn/multi_rnn_cell/cell_{cell}/{cell_kind}/")
}

/// Basic LSTM cell with gates laid out as `i, j, f, o`.
#[derive(Debug, Clone)]
struct LstmCell {
    /// (input + units, 4 * units)
    kernel: Tensor,
    /// (4 * units,)
    bias: Tensor,
}

impl LstmCell {
    fn step(&self, x: &Tensor, c: &Tensor, h: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut gates = Tensor::concat_cols(&[x, h])?.matmul(&self.kernel)?;
        gates.add_bias(&self.bias)?;

        let (batch_size, units) = (c.rows(), c.cols());
        let mut new_c = Tensor::zeros(&[batch_size, units]);
        let mut new_h = Tensor::zeros(&[batch_size, units]);
        for b in 0..batch_size {
            let g = &gates[b];
            let (i, rest) = g.split_at(units);
            let (j, rest) = rest.split_at(units);
            let (f, o) = rest.split_at(units);
            for u in 0..units {
                let cell = c[b][u] * sigmoid(f[u] + FORGET_BIAS) + sigmoid(i[u]) * j[u].tanh();
                new_c[b][u] = cell;
                new_h[b][u] = cell.tanh() * sigmoid(o[u]);
            }
        }
        Ok((new_c, new_h))
    }
}

#[derive(Debug)]
struct Decoder {
    /// (codebook, dim), the transposed checkpoint embedding
    vq_embedding: Option<Tensor>,
    input_kernel: Tensor,
    input_bias: Tensor,
    cells: Vec<LstmCell>,
    pitches_kernel: Tensor,
    pitches_bias: Tensor,
}

impl Decoder {
    fn from_weights(cfg: &ModelConfig, mut weights: Weights) -> Result<Self> {
        let vq_embedding = match cfg.vq {
            Some(codebook) => {
                let embedding = weights.take(VQ_EMBEDDING)?;
                expect_cols(&embedding, codebook)?;
                Some(embedding.transpose())
            }
            None => None,
        };
        let feature_width =
            cfg.fixed_feature_width() + vq_embedding.as_ref().map_or(0, Tensor::cols);
        if feature_width == 0 {
            return Err(GenieError::InvalidConfig(
                "no decoder features enabled".to_string(),
            ));
        }
        if cfg.iq.is_some_and(|bins| bins < 2) {
            return Err(GenieError::InvalidConfig(
                "interval quantization needs at least two bins".to_string(),
            ));
        }

        let input_kernel = weights.take(RNN_INPUT_KERNEL)?;
        expect_rows(&input_kernel, feature_width)?;
        let input_bias = weights.take(RNN_INPUT_BIAS)?;
        expect_len(&input_bias, input_kernel.cols())?;

        let units = cfg.rnn_units;
        let mut cells: Vec<LstmCell> = Vec::with_capacity(cfg.rnn_layers);
        for layer in 0..cfg.rnn_layers {
            let prefix = cell_prefix(cfg, layer);
            let cell = if cfg.single_layer_legacy && layer > 0 {
                cells[0].clone()
            } else {
                LstmCell {
                    kernel: weights.take(&format!("{prefix}kernel"))?,
                    bias: weights.take(&format!("{prefix}bias"))?,
                }
            };
            let input = if layer == 0 { input_kernel.cols() } else { units };
            expect_rows(&cell.kernel, input + units)?;
            expect_cols(&cell.kernel, 4 * units)?;
            expect_len(&cell.bias, 4 * units)?;
            cells.push(cell);
        }

        let pitches_kernel = weights.take(PITCHES_KERNEL)?;
        expect_rows(&pitches_kernel, units)?;
        let pitches_bias = weights.take(PITCHES_BIAS)?;
        expect_len(&pitches_bias, pitches_kernel.cols())?;

        Ok(Self {
            vq_embedding,
            input_kernel,
            input_bias,
            cells,
            pitches_kernel,
            pitches_bias,
        })
    }
}

fn expect_rows(t: &Tensor, rows: usize) -> Result<()> {
    if t.layout().len() != 2 || t.rows() != rows {
        return Err(GenieError::ShapeMismatch {
            expected: vec![rows, t.cols()],
            got: t.layout().to_vec(),
        });
    }
    Ok(())
}

fn expect_cols(t: &Tensor, cols: usize) -> Result<()> {
    if t.layout().len() != 2 || t.cols() != cols {
        return Err(GenieError::ShapeMismatch {
            expected: vec![t.rows(), cols],
            got: t.layout().to_vec(),
        });
    }
    Ok(())
}

fn expect_len(t: &Tensor, len: usize) -> Result<()> {
    if t.len() != len {
        return Err(GenieError::ShapeMismatch {
            expected: vec![len],
            got: t.layout().to_vec(),
        });
    }
    Ok(())
}

/// Stacked LSTM decoder mapping button presses to pitch logits.
pub struct Model {
    cfg: ModelConfig,
    decoder: Option<Decoder>,
}

impl Model {
    pub fn new(cfg: ModelConfig) -> Self {
        Self { cfg, decoder: None }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    pub fn is_initialized(&self) -> bool {
        self.decoder.is_some()
    }

    /// Output classes of the pitch projection.
    pub fn num_classes(&self) -> Result<usize> {
        self.decoder
            .as_ref()
            .map(|d| d.pitches_kernel.cols())
            .ok_or(GenieError::NotInitialized)
    }

    /// Loads weights from `static_weights` or, failing that, from the
    /// checkpoint at `uri`, then runs one warm-up step.
    pub async fn initialize(
        &mut self,
        uri: Option<&str>,
        static_weights: Option<Weights>,
    ) -> Result<()> {
        if self.decoder.take().is_some() {
            log::debug!("re-initializing model, previous weights released");
        }

        let weights = match (static_weights, uri) {
            (Some(weights), _) => weights,
            (None, Some(uri)) => Weights::from_uri(uri).await?,
            (None, None) => return Err(GenieError::MissingWeights),
        };
        self.decoder = Some(Decoder::from_weights(&self.cfg, weights)?);
        log::info!(
            "model initialized: {} layers x {} units, {} buttons",
            self.cfg.rnn_layers,
            self.cfg.rnn_units,
            self.cfg.num_buttons()
        );

        // avoid paying the first allocation on the first button press
        let cold_state = self.create_zero_state(1);
        self.evaluate(&cold_state, &[0], Some(&[START_SENTINEL]), Some(&[0.0]))?;
        Ok(())
    }

    pub fn create_zero_state(&self, batch_size: usize) -> LstmState {
        LstmState::zeros(batch_size, self.cfg.rnn_layers, self.cfg.rnn_units)
    }

    /// Advances `state` by one step. Returns the new state and the
    /// `(batch, classes)` logits; `state` itself is left untouched.
    pub fn evaluate(
        &self,
        state: &LstmState,
        buttons: &[usize],
        last_outputs: Option<&[i32]>,
        delta_times_seconds: Option<&[f32]>,
    ) -> Result<(LstmState, Tensor)> {
        let decoder = self.decoder.as_ref().ok_or(GenieError::NotInitialized)?;

        let batch_size = state.batch_size();
        check_batch("buttons", batch_size, buttons.len())?;
        if state.num_layers() != decoder.cells.len() {
            return Err(GenieError::ShapeMismatch {
                expected: vec![decoder.cells.len()],
                got: vec![state.num_layers()],
            });
        }

        let features = self.features(decoder, buttons, last_outputs, delta_times_seconds)?;
        let mut x = features.matmul(&decoder.input_kernel)?;
        x.add_bias(&decoder.input_bias)?;

        let mut next = LstmState {
            c: Vec::with_capacity(decoder.cells.len()),
            h: Vec::with_capacity(decoder.cells.len()),
        };
        for (layer, cell) in decoder.cells.iter().enumerate() {
            let (c, h) = cell.step(&x, &state.c[layer], &state.h[layer])?;
            x = h.clone();
            next.c.push(c);
            next.h.push(h);
        }

        let mut logits = x.matmul(&decoder.pitches_kernel)?;
        logits.add_bias(&decoder.pitches_bias)?;
        Ok((next, logits))
    }

    /// Decoder input features in fixed order: VQ, IQ, previous output,
    /// delta time.
    fn features(
        &self,
        decoder: &Decoder,
        buttons: &[usize],
        last_outputs: Option<&[i32]>,
        delta_times_seconds: Option<&[f32]>,
    ) -> Result<Tensor> {
        let batch_size = buttons.len();
        let mut parts = Vec::with_capacity(4);

        if let Some(embedding) = &decoder.vq_embedding {
            let codebook = embedding.rows();
            if let Some(&button) = buttons.iter().find(|&&b| b >= codebook) {
                return Err(GenieError::InvalidInput {
                    what: "button",
                    value: button as i64,
                    limit: codebook,
                });
            }
            parts.push(Tensor::from_rows(
                buttons.iter().map(|&b| &embedding[b]),
                embedding.cols(),
            ));
        }

        if let Some(bins) = self.cfg.iq {
            let scaled = buttons
                .iter()
                .map(|&b| 2.0 * (b as Float / (bins - 1) as Float) - 1.0)
                .collect();
            parts.push(Tensor::from_vec(scaled, &[batch_size, 1])?);
        }

        if self.cfg.autoregressive {
            let last_outputs = last_outputs.ok_or(GenieError::MissingInput("previous outputs"))?;
            check_batch("previous outputs", batch_size, last_outputs.len())?;
            let classes = self.cfg.autoregressive_classes();
            let mut one_hot = Tensor::zeros(&[batch_size, classes]);
            for (b, &output) in last_outputs.iter().enumerate() {
                let class = output as i64 + 1;
                if class < 0 || class >= classes as i64 {
                    return Err(GenieError::InvalidInput {
                        what: "previous output",
                        value: output as i64,
                        limit: classes - 1,
                    });
                }
                one_hot[b][class as usize] = 1.0;
            }
            parts.push(one_hot);
        }

        if self.cfg.delta_times {
            let delta_times =
                delta_times_seconds.ok_or(GenieError::MissingInput("delta times"))?;
            check_batch("delta times", batch_size, delta_times.len())?;
            let classes = self.cfg.delta_time_classes();
            let mut one_hot = Tensor::zeros(&[batch_size, classes]);
            for (b, &seconds) in delta_times.iter().enumerate() {
                one_hot[b][delta_time_bucket(seconds, self.cfg.max_discrete_times)] = 1.0;
            }
            parts.push(one_hot);
        }

        Tensor::concat_cols(&parts.iter().collect::<Vec<_>>())
    }
}

/// Nearest bucket at `DELTA_TIME_RATE` buckets per second, clamped to
/// `0..=max_bucket`.
pub fn delta_time_bucket(seconds: f32, max_bucket: usize) -> usize {
    let bucket = (seconds * DELTA_TIME_RATE).round().min(max_bucket as f32).max(0.0);
    (bucket + 1e-4) as usize
}

fn check_batch(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(GenieError::BatchMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::config::NUM_PITCHES;

    fn random(rng: &mut SmallRng, layout: &[usize], scale: Float) -> Tensor {
        let n: usize = layout.iter().product();
        let data = (0..n).map(|_| rng.gen_range(-scale..scale)).collect();
        Tensor::from_vec(data, layout).unwrap()
    }

    pub(crate) const VQ_DIM: usize = 4;

    /// Small random checkpoint matching `cfg`.
    pub(crate) fn synthetic_weights(cfg: &ModelConfig, seed: u64) -> Weights {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut weights = Weights::new();
        let units = cfg.rnn_units;

        let mut width = cfg.fixed_feature_width();
        if let Some(codebook) = cfg.vq {
            weights.insert(VQ_EMBEDDING, random(&mut rng, &[VQ_DIM, codebook], 1.0));
            width += VQ_DIM;
        }
        weights.insert(RNN_INPUT_KERNEL, random(&mut rng, &[width, units], 0.5));
        weights.insert(RNN_INPUT_BIAS, random(&mut rng, &[units], 0.1));
        let layers = if cfg.single_layer_legacy { 1 } else { cfg.rnn_layers };
        for layer in 0..layers {
            let prefix = cell_prefix(cfg, layer);
            weights.insert(
                format!("{prefix}kernel"),
                random(&mut rng, &[2 * units, 4 * units], 0.5),
            );
            weights.insert(format!("{prefix}bias"), random(&mut rng, &[4 * units], 0.1));
        }
        weights.insert(PITCHES_KERNEL, random(&mut rng, &[units, NUM_PITCHES], 1.0));
        weights.insert(PITCHES_BIAS, random(&mut rng, &[NUM_PITCHES], 0.1));
        weights
    }

    pub(crate) async fn initialized_model(cfg: ModelConfig, seed: u64) -> Model {
        let weights = synthetic_weights(&cfg, seed);
        let mut model = Model::new(cfg);
        model.initialize(None, Some(weights)).await.unwrap();
        model
    }
}
