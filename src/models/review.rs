//! Review-side records: raw reviews and their scored/text projections.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One review as ingested from the reviews dataset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReviewRecord {
    pub game_id: i64,
    pub game_name: String,
    pub text: String,
    /// 1 for a recommendation, -1 against
    pub score: i8,
}

/// Per-game vote count, the currency of the ranking queries
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScoredReview {
    pub game_id: i64,
    pub votes: u64,
    pub game_name: String,
}

/// One game's review texts kept for language analysis
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TextReview {
    pub game_id: i64,
    pub texts: Vec<String>,
}

/// Group the reviews matching the target score into per-game vote counts,
/// in first-seen game order.
pub fn to_scored(reviews: &[ReviewRecord], target_score: i8) -> Vec<ScoredReview> {
    let mut by_game: HashMap<i64, usize> = HashMap::new();
    let mut scored: Vec<ScoredReview> = Vec::new();

    for review in reviews.iter().filter(|r| r.score == target_score) {
        match by_game.get(&review.game_id) {
            Some(&i) => scored[i].votes += 1,
            None => {
                by_game.insert(review.game_id, scored.len());
                scored.push(ScoredReview {
                    game_id: review.game_id,
                    votes: 1,
                    game_name: review.game_name.clone(),
                });
            }
        }
    }
    scored
}

/// Group the texts of reviews matching the target score per game, in
/// first-seen game order.
pub fn to_text_reviews(reviews: &[ReviewRecord], target_score: i8) -> Vec<TextReview> {
    let mut by_game: HashMap<i64, usize> = HashMap::new();
    let mut grouped: Vec<TextReview> = Vec::new();

    for review in reviews.iter().filter(|r| r.score == target_score) {
        match by_game.get(&review.game_id) {
            Some(&i) => grouped[i].texts.push(review.text.clone()),
            None => {
                by_game.insert(review.game_id, grouped.len());
                grouped.push(TextReview {
                    game_id: review.game_id,
                    texts: vec![review.text.clone()],
                });
            }
        }
    }
    grouped
}

/// Sort ascending by votes, ties by game id. Deterministic, used by the
/// percentile cut.
pub fn sort_by_votes(reviews: &mut [ScoredReview]) {
    reviews.sort_by(|a, b| {
        a.votes
            .cmp(&b.votes)
            .then_with(|| a.game_id.cmp(&b.game_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(game_id: i64, score: i8, text: &str) -> ReviewRecord {
        ReviewRecord {
            game_id,
            game_name: format!("game-{}", game_id),
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn test_to_scored_counts_matching_reviews_per_game() {
        let reviews = vec![
            review(1, 1, "a"),
            review(2, 1, "b"),
            review(1, 1, "c"),
            review(1, -1, "d"),
        ];
        let scored = to_scored(&reviews, 1);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].game_id, 1);
        assert_eq!(scored[0].votes, 2);
        assert_eq!(scored[1].game_id, 2);
        assert_eq!(scored[1].votes, 1);
    }

    #[test]
    fn test_to_scored_with_negative_target() {
        let reviews = vec![review(1, 1, "a"), review(1, -1, "b"), review(1, -1, "c")];
        let scored = to_scored(&reviews, -1);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].votes, 2);
    }

    #[test]
    fn test_to_text_reviews_groups_texts_in_order() {
        let reviews = vec![
            review(1, -1, "broken"),
            review(2, -1, "laggy"),
            review(1, -1, "crashes"),
            review(1, 1, "fine"),
        ];
        let grouped = to_text_reviews(&reviews, -1);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].game_id, 1);
        assert_eq!(grouped[0].texts, vec!["broken", "crashes"]);
        assert_eq!(grouped[1].texts, vec!["laggy"]);
    }

    #[test]
    fn test_sort_by_votes_breaks_ties_by_game_id() {
        let mut reviews = vec![
            ScoredReview {
                game_id: 9,
                votes: 5,
                game_name: "b".to_string(),
            },
            ScoredReview {
                game_id: 3,
                votes: 5,
                game_name: "a".to_string(),
            },
            ScoredReview {
                game_id: 1,
                votes: 2,
                game_name: "c".to_string(),
            },
        ];
        sort_by_votes(&mut reviews);
        let ids: Vec<i64> = reviews.iter().map(|r| r.game_id).collect();
        assert_eq!(ids, vec![1, 3, 9]);
    }
}
