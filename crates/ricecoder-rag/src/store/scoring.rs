//! Distance, score and certainty per metric
//!
//! - cosine: distance `1 - cos`, score `1 - d`, certainty `1 - d / 2`
//! - euclidean: squared L2 distance, score `1 / (1 + d)`
//! - dot: distance `-dot`, score `-d`
//!
//! Certainty only exists for cosine.

use crate::types::DistanceMetric;

pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => {
            let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
                (0.0f32, 0.0f32, 0.0f32),
                |(dot, na, nb), (x, y)| (dot + x * y, na + x * x, nb + y * y),
            );
            let denominator = norm_a.sqrt() * norm_b.sqrt();
            if denominator == 0.0 {
                1.0
            } else {
                1.0 - (dot / denominator).clamp(-1.0, 1.0)
            }
        }
        DistanceMetric::Euclidean => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceMetric::Dot => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
    }
}

pub fn score(metric: DistanceMetric, distance: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        DistanceMetric::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
        DistanceMetric::Dot => -distance,
    }
}

pub fn certainty(metric: DistanceMetric, distance: f32) -> Option<f32> {
    match metric {
        DistanceMetric::Cosine => Some(1.0 - distance / 2.0),
        _ => None,
    }
}
