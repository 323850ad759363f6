//! Enrolled-embedding gallery with batched cosine matching.
//!
//! Loaded from a snapshot file exported by the enrollment pipeline.
//! A missing or unreadable snapshot is not fatal: the kiosk keeps
//! running with an empty gallery and simply matches nobody.

use crate::types::Embedding;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Embedding dimensionality shared with the enrollment pipeline.
pub const EMBEDDING_DIM: usize = 512;

/// One enrolled person, immutable during kiosk operation.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    pub user_id: u64,
    pub name: String,
    pub embedding: Embedding,
    /// Enrollment-quality score in [0, 1].
    pub quality: f32,
    pub model_version: String,
}

/// On-disk snapshot layout (written by the enrollment export job).
#[derive(Debug, Serialize, Deserialize)]
struct GallerySnapshot {
    version: String,
    exported_at: Option<String>,
    embedding_dim: usize,
    #[serde(default)]
    embeddings: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    user_id: u64,
    name: String,
    embedding: Vec<f32>,
    #[serde(default)]
    quality: f32,
    #[serde(default)]
    model_version: String,
}

/// In-memory gallery: identities plus a stacked matrix so a probe is
/// matched against everyone in one matrix-vector product.
pub struct EmbeddingGallery {
    identities: Vec<EnrolledIdentity>,
    matrix: Option<Array2<f32>>,
}

impl EmbeddingGallery {
    pub fn empty() -> Self {
        Self {
            identities: Vec::new(),
            matrix: None,
        }
    }

    /// Load a gallery snapshot. Never fails: any problem yields an
    /// empty gallery and a warning, and the kiosk carries on.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "gallery snapshot unreadable, running with empty gallery");
                return Self::empty();
            }
        };

        let snapshot: GallerySnapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "gallery snapshot corrupt, running with empty gallery");
                return Self::empty();
            }
        };

        let mut identities = Vec::with_capacity(snapshot.embeddings.len());
        for entry in snapshot.embeddings {
            if entry.embedding.len() != snapshot.embedding_dim {
                tracing::warn!(
                    user_id = entry.user_id,
                    expected = snapshot.embedding_dim,
                    got = entry.embedding.len(),
                    "skipping gallery entry with wrong embedding dimension"
                );
                continue;
            }
            let mut embedding = Embedding {
                values: entry.embedding,
                model_version: if entry.model_version.is_empty() {
                    None
                } else {
                    Some(entry.model_version.clone())
                },
            };
            embedding.l2_normalize();
            identities.push(EnrolledIdentity {
                user_id: entry.user_id,
                name: entry.name,
                embedding,
                quality: entry.quality,
                model_version: entry.model_version,
            });
        }

        let gallery = Self::from_identities(identities);
        tracing::info!(
            path = %path.display(),
            count = gallery.len(),
            "loaded embedding gallery"
        );
        gallery
    }

    /// Build a gallery from identities, normalizing each vector and
    /// precomputing the stacked comparison matrix.
    pub fn from_identities(mut identities: Vec<EnrolledIdentity>) -> Self {
        for id in &mut identities {
            id.embedding.l2_normalize();
        }

        let matrix = if identities.is_empty() {
            None
        } else {
            let dim = identities[0].embedding.dim();
            let mut m = Array2::<f32>::zeros((identities.len(), dim));
            for (row, id) in identities.iter().enumerate() {
                for (col, v) in id.embedding.values.iter().enumerate() {
                    m[[row, col]] = *v;
                }
            }
            Some(m)
        };

        Self { identities, matrix }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identity(&self, user_id: u64) -> Option<&EnrolledIdentity> {
        self.identities.iter().find(|i| i.user_id == user_id)
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    /// Batched similarity scores for a normalized probe.
    fn scores(&self, query: &Embedding) -> Option<Array1<f32>> {
        let matrix = self.matrix.as_ref()?;
        if query.dim() != matrix.ncols() {
            tracing::warn!(
                probe_dim = query.dim(),
                gallery_dim = matrix.ncols(),
                "probe dimensionality does not match gallery"
            );
            return None;
        }
        let q = Array1::from_vec(query.values.clone());
        Some(matrix.dot(&q))
    }

    /// Best match above `threshold`, or `(None, best_score)` when the
    /// top candidate falls short. The probe is normalized before
    /// comparison.
    pub fn find_match(
        &self,
        query: &Embedding,
        threshold: f32,
    ) -> (Option<&EnrolledIdentity>, f32) {
        let mut probe = query.clone();
        probe.l2_normalize();

        let Some(scores) = self.scores(&probe) else {
            return (None, 0.0);
        };

        let mut best_idx = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (i, &s) in scores.iter().enumerate() {
            if s > best_score {
                best_score = s;
                best_idx = i;
            }
        }

        if best_score >= threshold {
            (Some(&self.identities[best_idx]), best_score)
        } else {
            (None, best_score)
        }
    }

    /// Top-k candidates regardless of threshold, best first. For
    /// tuning and diagnostics only.
    pub fn find_top_k(&self, query: &Embedding, k: usize) -> Vec<(&EnrolledIdentity, f32)> {
        let mut probe = query.clone();
        probe.l2_normalize();

        let Some(scores) = self.scores(&probe) else {
            return Vec::new();
        };

        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(k)
            .map(|(i, s)| (&self.identities[i], s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn identity(user_id: u64, name: &str, values: Vec<f32>) -> EnrolledIdentity {
        EnrolledIdentity {
            user_id,
            name: name.to_string(),
            embedding: Embedding {
                values,
                model_version: None,
            },
            quality: 0.9,
            model_version: String::new(),
        }
    }

    fn probe(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    #[test]
    fn test_exact_probe_scores_one() {
        let gallery = EmbeddingGallery::from_identities(vec![identity(1, "A", vec![1.0, 0.0, 0.0])]);
        let (m, score) = gallery.find_match(&probe(vec![1.0, 0.0, 0.0]), 0.35);
        assert_eq!(m.map(|i| i.user_id), Some(1));
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unrelated_probe_below_threshold() {
        let gallery = EmbeddingGallery::from_identities(vec![identity(1, "A", vec![1.0, 0.0, 0.0])]);
        let (m, score) = gallery.find_match(&probe(vec![0.0, 1.0, 0.0]), 0.35);
        assert!(m.is_none());
        assert!(score < 0.35);
    }

    #[test]
    fn test_match_is_deterministic() {
        let gallery = EmbeddingGallery::from_identities(vec![
            identity(1, "A", vec![1.0, 0.0]),
            identity(2, "B", vec![0.6, 0.8]),
        ]);
        let q = probe(vec![0.9, 0.1]);
        let first = gallery.find_match(&q, 0.35);
        let second = gallery.find_match(&q, 0.35);
        assert_eq!(first.0.map(|i| i.user_id), second.0.map(|i| i.user_id));
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let gallery = EmbeddingGallery::from_identities(vec![
            identity(1, "A", vec![1.0, 0.0]),
            identity(2, "B", vec![0.0, 1.0]),
        ]);
        let q = probe(vec![0.8, 0.6]);
        let mut prev_matched = true;
        for threshold in [0.0, 0.2, 0.4, 0.6, 0.8, 0.95, 1.01] {
            let matched = gallery.find_match(&q, threshold).0.is_some();
            // Raising the threshold can only turn a match into a non-match.
            assert!(prev_matched || !matched, "match reappeared at {threshold}");
            prev_matched = matched;
        }
    }

    #[test]
    fn test_empty_gallery_matches_nobody() {
        let gallery = EmbeddingGallery::empty();
        let (m, score) = gallery.find_match(&probe(vec![1.0, 0.0]), 0.0);
        assert!(m.is_none());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_top_k_ordering() {
        let gallery = EmbeddingGallery::from_identities(vec![
            identity(1, "far", vec![0.0, 1.0]),
            identity(2, "near", vec![1.0, 0.0]),
            identity(3, "mid", vec![0.7, 0.7]),
        ]);
        let top = gallery.find_top_k(&probe(vec![1.0, 0.0]), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0.user_id, 2);
        assert_eq!(top[1].0.user_id, 3);
        assert!(top[0].1 >= top[1].1);
    }

    #[test]
    fn test_load_missing_snapshot_yields_empty() {
        let gallery = EmbeddingGallery::load(Path::new("/nonexistent/gallery.json"));
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_load_skips_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{
                "version": "1.0",
                "exported_at": "2026-01-05T08:00:00",
                "embedding_dim": 3,
                "embeddings": [
                    {{"user_id": 1, "name": "ok", "embedding": [1.0, 0.0, 0.0], "quality": 0.9, "model_version": "w600k_r50"}},
                    {{"user_id": 2, "name": "bad", "embedding": [1.0, 0.0], "quality": 0.9, "model_version": "w600k_r50"}}
                ]
            }}"#
        )
        .unwrap();

        let gallery = EmbeddingGallery::load(&path);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.identities()[0].user_id, 1);
    }
}
