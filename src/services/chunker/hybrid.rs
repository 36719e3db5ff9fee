//! Boundary fusion for the hybrid strategy.

/// `semantic_weight · clamp(1 − similarity) + lexical_weight · structural`.
pub fn boundary_strength(
    similarity: f32,
    structural: f32,
    semantic_weight: f32,
    lexical_weight: f32,
) -> f32 {
    let semantic = (1.0 - similarity).clamp(0.0, 1.0);
    semantic_weight * semantic + lexical_weight * structural
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_strength() {
        // Same topic, paragraph break: structure alone.
        assert!((boundary_strength(1.0, 1.0, 0.6, 0.4) - 0.4).abs() < 1e-6);
        // Topic shift inside running text: semantics alone.
        assert!((boundary_strength(0.0, 0.0, 0.6, 0.4) - 0.6).abs() < 1e-6);
        // Negative similarity is clamped.
        assert!((boundary_strength(-0.5, 0.5, 0.6, 0.4) - 0.8).abs() < 1e-6);
    }
}
