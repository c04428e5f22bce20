use rand::Rng;

use crate::Float;

pub fn argmax(x: &[Float]) -> usize {
    debug_assert!(!x.is_empty());
    x.iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ib.cmp(ia)))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

pub fn softmax(x: &mut [Float]) {
    debug_assert!(!x.is_empty());
    let max_val = x.iter().fold(Float::NAN, |acc, &v| v.max(acc));
    let mut sum = 0 as Float;
    for v in x.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    x.iter_mut().for_each(|v| *v /= sum);
}

/// Temperature 0 collapses to a one-hot at the arg-max, 1 is a plain softmax.
pub fn softmax_with_temperature(x: &mut [Float], temperature: Float) {
    if temperature == 0 as Float {
        let idx = argmax(x);
        x.iter_mut().for_each(|v| *v = 0 as Float);
        x[idx] = 1 as Float;
        return;
    }
    if temperature != 1 as Float {
        x.iter_mut().for_each(|v| *v /= temperature);
    }
    softmax(x);
}

pub fn sigmoid(x: Float) -> Float {
    1 as Float / (1 as Float + (-x).exp())
}

pub fn dot(a: &[Float], b: &[Float]) -> Float {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).fold(0 as Float, |acc, (a, b)| acc + a * b)
}

/// (1 - lambda) * p + lambda * q, in place on `p`.
pub fn blend(p: &mut [Float], q: &[Float], lambda: Float) {
    debug_assert_eq!(p.len(), q.len());
    p.iter_mut()
        .zip(q.iter())
        .for_each(|(p, q)| *p = (1 as Float - lambda) * *p + lambda * q);
}

/// One draw from a normalized distribution.
pub fn sample<R: Rng + ?Sized>(probs: &[Float], rng: &mut R) -> usize {
    let r = rng.gen::<Float>();

    let mut cdf = 0 as Float;
    for (idx, p) in probs.iter().enumerate() {
        cdf += *p;
        if r < cdf {
            return idx;
        }
    }
    // rounding can leave cdf slightly below 1
    probs
        .iter()
        .rposition(|&p| p > 0 as Float)
        .unwrap_or(probs.len() - 1)
}
