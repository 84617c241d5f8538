use std::collections::HashMap;

use common::storage::vector::VectorHit;

/// One fused search item: the best record found for an id plus its
/// accumulated reciprocal-rank score and the indices that surfaced it.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub record: common::storage::vector::VectorRecord,
    pub rrf_score: f32,
    pub indices: Vec<String>,
}

impl FusedHit {
    pub fn is_chunk(&self) -> bool {
        is_chunk_id(&self.record.id)
    }
}

/// Chunk ids embed their artifact id before the first `::`.
pub fn artifact_key(id: &str) -> &str {
    id.split("::").next().unwrap_or(id)
}

pub fn is_chunk_id(id: &str) -> bool {
    id.contains("::")
}

/// Reciprocal-rank fusion across index result lists. An item ranked `r`
/// (1-based) in an index contributes `1 / (k + r)`; items absent from an
/// index contribute nothing there. Output is sorted by fused score
/// descending.
pub fn fuse_indices(results_by_index: &[(String, Vec<VectorHit>)], k: u32) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for (index_name, hits) in results_by_index {
        for (position, hit) in hits.iter().enumerate() {
            let rank = position + 1;
            let contribution = 1.0 / (k as f32 + rank as f32);

            fused
                .entry(hit.record.id.clone())
                .and_modify(|existing| {
                    existing.rrf_score += contribution;
                    existing.indices.push(index_name.clone());
                })
                .or_insert_with(|| FusedHit {
                    record: hit.record.clone(),
                    rrf_score: contribution,
                    indices: vec![index_name.clone()],
                });
        }
    }

    let mut items: Vec<FusedHit> = fused.into_values().collect();
    items.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });

    items
}

/// Collapse fused hits to one representative per artifact: a chunk hit beats
/// the full-artifact hit (more precise), and among chunks the highest fused
/// score wins.
pub fn dedupe_by_artifact(hits: Vec<FusedHit>) -> Vec<FusedHit> {
    let mut best: HashMap<String, FusedHit> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for hit in hits {
        let key = artifact_key(&hit.record.id).to_string();
        match best.get(&key) {
            None => {
                order.push(key.clone());
                best.insert(key, hit);
            }
            Some(existing) => {
                let replace = match (hit.is_chunk(), existing.is_chunk()) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => hit.rrf_score > existing.rrf_score,
                };
                if replace {
                    best.insert(key, hit);
                }
            }
        }
    }

    let mut deduped: Vec<FusedHit> = order
        .into_iter()
        .filter_map(|key| best.remove(&key))
        .collect();
    deduped.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });

    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::vector::VectorRecord;

    fn hit(id: &str, score: f32) -> VectorHit {
        VectorHit {
            record: VectorRecord {
                id: id.to_string(),
                text: format!("text {id}"),
                embedding: vec![1.0, 0.0],
                artifact_id: artifact_key(id).to_string(),
                artifact_uid: format!("uid_{}", artifact_key(id)),
                revision_id: "rev_000001".to_string(),
                chunk_index: is_chunk_id(id).then_some(0),
                start_char: None,
                end_char: None,
                token_count: 3,
                content_hash: "hash".to_string(),
                title: None,
                sensitivity: "normal".to_string(),
                visibility_scope: "me".to_string(),
                ingested_at: Utc::now(),
            },
            score,
        }
    }

    #[test]
    fn single_index_preserves_input_ranking() {
        let results = vec![(
            "content".to_string(),
            vec![hit("art_a", 0.9), hit("art_b", 0.8), hit("art_c", 0.7)],
        )];

        let fused = fuse_indices(&results, 60);
        let ids: Vec<&str> = fused.iter().map(|f| f.record.id.as_str()).collect();
        assert_eq!(ids, vec!["art_a", "art_b", "art_c"]);
    }

    #[test]
    fn rrf_scores_follow_the_formula() {
        let results = vec![
            ("content".to_string(), vec![hit("art_a", 0.9), hit("art_b", 0.8)]),
            ("chunks".to_string(), vec![hit("art_b::chunk::000::aa", 0.95)]),
        ];

        let fused = fuse_indices(&results, 60);
        let by_id: HashMap<&str, f32> = fused
            .iter()
            .map(|f| (f.record.id.as_str(), f.rrf_score))
            .collect();

        assert!((by_id["art_a"] - 1.0 / 61.0).abs() < 1e-6);
        assert!((by_id["art_b"] - 1.0 / 62.0).abs() < 1e-6);
        assert!((by_id["art_b::chunk::000::aa"] - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn item_in_multiple_indices_accumulates() {
        let results = vec![
            ("content".to_string(), vec![hit("art_a", 0.9)]),
            ("chunks".to_string(), vec![hit("art_a", 0.8)]),
        ];

        let fused = fuse_indices(&results, 60);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].rrf_score - 2.0 / 61.0).abs() < 1e-6);
        assert_eq!(fused[0].indices.len(), 2);
    }

    #[test]
    fn chunk_hit_beats_full_artifact_hit() {
        // The full artifact ranks first, its chunk second; the chunk is the
        // more precise representative and must win the dedup.
        let results = vec![
            ("content".to_string(), vec![hit("art_a", 0.9)]),
            ("chunks".to_string(), vec![hit("art_a::chunk::002::bb", 0.95)]),
        ];

        let fused = fuse_indices(&results, 60);
        let deduped = dedupe_by_artifact(fused);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].record.id, "art_a::chunk::002::bb");
    }

    #[test]
    fn best_scoring_chunk_represents_the_artifact() {
        let results = vec![(
            "chunks".to_string(),
            vec![
                hit("art_a::chunk::000::aa", 0.9),
                hit("art_a::chunk::001::bb", 0.8),
                hit("art_b::chunk::000::cc", 0.7),
            ],
        )];

        let fused = fuse_indices(&results, 60);
        let deduped = dedupe_by_artifact(fused);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].record.id, "art_a::chunk::000::aa");
        assert_eq!(deduped[1].record.id, "art_b::chunk::000::cc");
    }
}
