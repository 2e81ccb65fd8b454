//! Product relevance ranking against a customer utterance.

use crate::catalog::model::Product;

/// Scores a product against a free-text query. Higher is more relevant;
/// zero means no evidence of relevance.
pub trait ProductRanker: Send + Sync {
    fn score(&self, query: &str, product: &Product) -> u32;
}

/// Substring and word-overlap scoring over name, description and category.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordRanker;

const NAME_HIT: u32 = 10;
const DESCRIPTION_HIT: u32 = 5;
const WORD_HIT: u32 = 3;
const PARTIAL_HIT: u32 = 1;
const MIN_PARTIAL_LEN: usize = 3;

impl ProductRanker for KeywordRanker {
    fn score(&self, query: &str, product: &Product) -> u32 {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return 0;
        }

        let name = product.name.to_lowercase();
        let description = product.description.as_deref().unwrap_or("").to_lowercase();
        let category = product.category.as_deref().unwrap_or("").to_lowercase();
        let searchable = format!("{name} {description} {category}");

        let mut score = 0;
        if name.contains(&query) {
            score += NAME_HIT;
        }
        if !description.is_empty() && description.contains(&query) {
            score += DESCRIPTION_HIT;
        }

        for word in query.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                continue;
            }
            if searchable.contains(word) {
                score += WORD_HIT;
            } else if word.chars().count() >= MIN_PARTIAL_LEN {
                score += searchable
                    .split_whitespace()
                    .filter(|s| s.chars().count() >= MIN_PARTIAL_LEN && word.contains(*s))
                    .count() as u32
                    * PARTIAL_HIT;
            }
        }
        score
    }
}

/// Order products by descending score. Equal scores keep catalog order.
pub fn rank<'a>(
    ranker: &dyn ProductRanker,
    query: &str,
    products: &'a [Product],
) -> Vec<&'a Product> {
    let mut scored: Vec<(u32, &Product)> = products
        .iter()
        .map(|p| (ranker.score(query, p), p))
        .collect();
    // sort_by is stable
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, p)| p).collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    fn product(name: &str, description: Option<&str>) -> Product {
        let mut p = Product::new(Uuid::nil(), name, Some(dec!(10)));
        p.description = description.map(str::to_string);
        p
    }

    #[test]
    fn name_substring_scores_highest() {
        let r = KeywordRanker;
        let set = product("Premium Dinner Set", None);
        // name hit + two word hits
        assert_eq!(r.score("dinner set", &set), 10 + 3 + 3);
    }

    #[test]
    fn description_and_word_hits() {
        let r = KeywordRanker;
        let bowl = product("Bowl", Some("steel serving bowl"));
        assert_eq!(r.score("serving", &bowl), 5 + 3);
    }

    #[test]
    fn partial_match_on_longer_words() {
        let r = KeywordRanker;
        let plate = product("Plate", None);
        // "plates" is not a substring of "plate", but contains it
        assert_eq!(r.score("plates", &plate), 1);
        assert_eq!(r.score("xy", &plate), 0);
    }

    #[test]
    fn punctuation_is_ignored_in_query_words() {
        let r = KeywordRanker;
        let set = product("Premium Dinner Set", None);
        assert!(r.score("Do you have the dinner set?", &set) >= 6);
    }

    #[test]
    fn empty_query_scores_zero() {
        assert_eq!(KeywordRanker.score("   ", &product("Plate", None)), 0);
    }

    #[test]
    fn rank_is_stable_for_ties() {
        let products = vec![
            product("Cup", None),
            product("Glass", None),
            product("Dinner Set", None),
            product("Mug", None),
        ];
        let ranked = rank(&KeywordRanker, "dinner", &products);
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Dinner Set", "Cup", "Glass", "Mug"]);
    }
}
