use std::fmt;
use std::str::FromStr;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::cache::{ButtonCache, NeuralCache};
use crate::{operator, tensor::Tensor, Float, GenieError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingType {
    Greedy,
    Categorical,
    ButtonUnigram,
    NeuralCache,
}

impl TryFrom<u8> for SamplingType {
    type Error = GenieError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Greedy),
            1 => Ok(Self::Categorical),
            2 => Ok(Self::ButtonUnigram),
            3 => Ok(Self::NeuralCache),
            other => Err(GenieError::UnknownSamplingType(other.to_string())),
        }
    }
}

impl FromStr for SamplingType {
    type Err = GenieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "greedy" => Ok(Self::Greedy),
            "categorical" => Ok(Self::Categorical),
            "button_unigram" => Ok(Self::ButtonUnigram),
            "neural_cache" => Ok(Self::NeuralCache),
            other => other
                .parse::<u8>()
                .map_err(|_| GenieError::UnknownSamplingType(s.to_string()))
                .and_then(Self::try_from),
        }
    }
}

impl fmt::Display for SamplingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Greedy => "greedy",
            Self::Categorical => "categorical",
            Self::ButtonUnigram => "button_unigram",
            Self::NeuralCache => "neural_cache",
        };
        f.write_str(name)
    }
}

/// Per-row temperature softmax of `(batch, classes)` logits.
pub fn scores_with_temperature(logits: &Tensor, temperature: Float) -> Tensor {
    let mut scores = logits.clone();
    for row in 0..scores.rows() {
        operator::softmax_with_temperature(&mut scores[row], temperature);
    }
    scores
}

/// Turns logits into one chosen class per batch row.
pub struct Sampler {
    rng: SmallRng,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn greedy(&self, logits: &Tensor) -> Vec<usize> {
        (0..logits.rows())
            .map(|row| operator::argmax(&logits[row]))
            .collect()
    }

    pub fn categorical(&mut self, logits: &Tensor, temperature: Float) -> Vec<usize> {
        let scores = scores_with_temperature(logits, temperature);
        self.draw(&scores)
    }

    /// Blends each row with the empirical outputs previously produced by
    /// `buttons[row]`, once the cache is full.
    pub fn button_unigram(
        &mut self,
        logits: &Tensor,
        cache: &ButtonCache,
        buttons: &[usize],
        temperature: Float,
        lambda: Float,
    ) -> Result<Vec<usize>> {
        let (batch_size, num_classes) = (logits.rows(), logits.cols());
        if buttons.len() != batch_size {
            return Err(GenieError::BatchMismatch {
                what: "buttons",
                expected: batch_size,
                got: buttons.len(),
            });
        }

        let mut scores = scores_with_temperature(logits, temperature);
        for (row, &button) in buttons.iter().enumerate() {
            if !cache.is_full() {
                continue;
            }
            let mut densities = vec![0 as Float; num_classes];
            let mut total = 0 as Float;
            for &(b, output) in cache {
                if b == button && output < num_classes {
                    densities[output] += 1 as Float;
                    total += 1 as Float;
                }
            }
            if total > 0 as Float {
                densities.iter_mut().for_each(|d| *d /= total);
                operator::blend(&mut scores[row], &densities, lambda);
            }
        }

        Ok(self.draw(&scores))
    }

    /// Blends each row with cached outputs weighted by
    /// `exp(theta * <states[row], snapshot>)`, once the cache is full.
    pub fn neural_cache(
        &mut self,
        logits: &Tensor,
        cache: &NeuralCache,
        states: &Tensor,
        temperature: Float,
        lambda: Float,
        theta: Float,
    ) -> Result<Vec<usize>> {
        let (batch_size, num_classes) = (logits.rows(), logits.cols());
        if states.rows() != batch_size {
            return Err(GenieError::BatchMismatch {
                what: "representative states",
                expected: batch_size,
                got: states.rows(),
            });
        }

        let mut scores = scores_with_temperature(logits, temperature);
        for row in 0..batch_size {
            if !cache.is_full() {
                continue;
            }
            let state = &states[row];
            let mut densities = vec![0 as Float; num_classes];
            let mut total = 0 as Float;
            for (snapshot, outputs) in cache {
                let item = row.min(outputs.len().saturating_sub(1));
                let Some(&output) = outputs.get(item) else {
                    continue;
                };
                if output >= num_classes {
                    continue;
                }
                let density = if theta == 0 as Float {
                    1 as Float
                } else {
                    let historical = &snapshot[row.min(snapshot.rows().saturating_sub(1))];
                    (theta * operator::dot(state, historical)).exp()
                };
                densities[output] += density;
                total += density;
            }
            if total > 0 as Float && total.is_finite() {
                densities.iter_mut().for_each(|d| *d /= total);
                operator::blend(&mut scores[row], &densities, lambda);
            }
        }

        Ok(self.draw(&scores))
    }

    fn draw(&mut self, scores: &Tensor) -> Vec<usize> {
        (0..scores.rows())
            .map(|row| operator::sample(&scores[row], &mut self.rng))
            .collect()
    }
}
