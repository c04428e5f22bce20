use crate::{tensor::Tensor, GenieError, Result};

/// Recurrent state of the stacked LSTM decoder.
///
/// One `(c, h)` pair per layer, each `(batch_size, units)`. A state is never
/// updated in place: `Model::evaluate` returns a fresh one and the
/// superseded state is released when its owner drops or replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmState {
    /// cell state per layer
    pub c: Vec<Tensor>,
    /// hidden state per layer
    pub h: Vec<Tensor>,
}

impl LstmState {
    pub fn zeros(batch_size: usize, num_layers: usize, num_units: usize) -> Self {
        Self {
            c: (0..num_layers)
                .map(|_| Tensor::zeros(&[batch_size, num_units]))
                .collect(),
            h: (0..num_layers)
                .map(|_| Tensor::zeros(&[batch_size, num_units]))
                .collect(),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.c.len()
    }

    pub fn batch_size(&self) -> usize {
        self.c.first().map(Tensor::rows).unwrap_or(0)
    }

    /// Hidden state of the last layer, used as a fingerprint of the context.
    pub fn representative(&self) -> &Tensor {
        &self.h[self.h.len() - 1]
    }

    /// New state of `batch_size` items, each a copy of `item`.
    pub fn copy_item_to_batch(&self, item: usize, batch_size: usize) -> Result<Self> {
        if item >= self.batch_size() {
            return Err(GenieError::IndexOutOfRange {
                index: item,
                len: self.batch_size(),
            });
        }
        Ok(Self {
            c: self
                .c
                .iter()
                .map(|c| c.broadcast_row(item, batch_size))
                .collect::<Result<_>>()?,
            h: self
                .h
                .iter()
                .map(|h| h.broadcast_row(item, batch_size))
                .collect::<Result<_>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_state(batch_size: usize, layers: usize, units: usize) -> LstmState {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut state = LstmState::zeros(batch_size, layers, units);
        for t in state.c.iter_mut().chain(state.h.iter_mut()) {
            t.iter_mut().for_each(|v| *v = rng.gen_range(-1.0..1.0));
        }
        state
    }

    #[test]
    fn test_zero_state() {
        let state = LstmState::zeros(3, 2, 4);
        assert_eq!(state.num_layers(), 2);
        assert_eq!(state.batch_size(), 3);
        assert!(state.c.iter().all(|c| c.layout() == [3, 4]));
        assert!(state.h.iter().flat_map(|h| h.iter()).all(|&v| v == 0.0));
    }

    #[test]
    fn test_copy_item_to_batch() {
        let (batch_size, chosen) = (8, 3);
        let state = random_state(batch_size, 2, 16);

        for new_size in [batch_size, 5] {
            let copied = state.copy_item_to_batch(chosen, new_size).unwrap();
            assert_eq!(copied.batch_size(), new_size);
            for layer in 0..state.num_layers() {
                for j in 0..new_size {
                    assert_eq!(&copied.c[layer][j], &state.c[layer][chosen]);
                    assert_eq!(&copied.h[layer][j], &state.h[layer][chosen]);
                }
            }
        }
    }

    #[test]
    fn test_copy_item_out_of_range() {
        let state = LstmState::zeros(2, 1, 4);
        assert!(matches!(
            state.copy_item_to_batch(2, 2),
            Err(GenieError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_representative_is_last_hidden() {
        let state = random_state(2, 3, 4);
        assert_eq!(state.representative(), &state.h[2]);
        assert_ne!(state.representative(), &state.h[0]);
    }
}
