//! Contributor colouring for a book page.

use core_types::{Book, Uid};
use log::warn;

use crate::{config::LedgerConfig, math};

/// Owner ids of every contribution combination on `book`, split out of
/// `uids_for_css`. Unparseable ids are dropped.
fn combinations(book: &Book) -> Vec<Vec<Uid>> {
    book.uids_for_css
        .iter()
        .map(|key| {
            key.split('-')
                .filter_map(|part| match part.parse::<Uid>() {
                    Ok(uid) => Some(uid),
                    Err(_) => {
                        warn!("[book {}] ignoring contributor id {part:?}", book.id);
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|uids| !uids.is_empty())
        .collect()
}

/// Unique contributors of `book` in first-seen order.
pub fn contributors(book: &Book) -> Vec<Uid> {
    let mut seen = Vec::new();
    for uid in combinations(book).into_iter().flatten() {
        if !seen.contains(&uid) {
            seen.push(uid);
        }
    }
    seen
}

/// CSS colouring each contributor with a solid background and each
/// combination of two to four contributors with horizontal stripes.
/// Larger combinations get no rule of their own.
pub fn stylesheet(book: &Book, config: &LedgerConfig) -> String {
    let color = |uid: Uid| math::integer_to_color(uid, config.color_saturation, config.color_lightness);
    let mut css = String::new();
    let mut singles: Vec<Uid> = Vec::new();

    for uids in combinations(book) {
        for &uid in &uids {
            if !singles.contains(&uid) {
                singles.push(uid);
                css.push_str(&format!(
                    ".colorize.story-color-{uid} {{background-color: {};}}",
                    color(uid)
                ));
            }
        }
        let key = uids
            .iter()
            .map(Uid::to_string)
            .collect::<Vec<_>>()
            .join("-");
        match uids.as_slice() {
            [a, b] => {
                let (c1, c2) = (color(*a), color(*b));
                css.push_str(&format!(
                    ".colorize.story-color-{key} {{background-image: linear-gradient(0deg, {c1} 0, {c1} 50%, {c2} 50%, {c2} 100%);}}"
                ));
            }
            [a, b, c] => {
                let (c1, c2, c3) = (color(*a), color(*b), color(*c));
                css.push_str(&format!(
                    ".colorize.story-color-{key} {{background-image: linear-gradient(0deg, {c1} 0, {c1} 33%, {c2} 33%, {c2} 66%, {c3} 66%, {c3} 100%); background-size: 18px;}}"
                ));
            }
            [a, b, c, d] => {
                let (c1, c2, c3, c4) = (color(*a), color(*b), color(*c), color(*d));
                css.push_str(&format!(
                    ".colorize.story-color-{key} {{background-image: linear-gradient(0deg, {c1} 0, {c1} 25%, {c2} 25%, {c2} 50%, {c3} 50%, {c3} 75%, {c4} 75%, {c4} 100%);}}"
                ));
            }
            _ => {}
        }
    }
    css
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(keys: &[&str]) -> Book {
        let mut book = Book::new(1, "");
        book.uids_for_css = keys.iter().map(|k| k.to_string()).collect();
        book
    }

    #[test]
    fn contributors_keep_first_seen_order() {
        assert_eq!(contributors(&book(&["3-1", "1", "2-3", "x"])), vec![3, 1, 2]);
        assert!(contributors(&book(&[])).is_empty());
    }

    #[test]
    fn single_contributor_gets_one_rule() {
        let css = stylesheet(&book(&["1", "1"]), &LedgerConfig::default());
        assert_eq!(css, ".colorize.story-color-1 {background-color: hsl(46, 100%, 80%);}");
    }

    #[test]
    fn pairs_get_half_stripes() {
        let css = stylesheet(&book(&["1-2"]), &LedgerConfig::default());
        let c1 = math::integer_to_random_color(1);
        let c2 = math::integer_to_random_color(2);
        assert!(css.starts_with(".colorize.story-color-1 {"));
        assert!(css.contains(".colorize.story-color-2 {"));
        assert!(css.ends_with(&format!(
            ".colorize.story-color-1-2 {{background-image: linear-gradient(0deg, {c1} 0, {c1} 50%, {c2} 50%, {c2} 100%);}}"
        )));
    }

    #[test]
    fn triples_and_quads_get_stripes_larger_sets_do_not() {
        let config = LedgerConfig::default();
        let css = stylesheet(&book(&["1-2-3"]), &config);
        assert!(css.contains("66%, ") && css.contains("background-size: 18px;"));
        let css = stylesheet(&book(&["1-2-3-4"]), &config);
        assert!(css.contains(".colorize.story-color-1-2-3-4 {"));
        assert!(css.contains("75%, "));
        let css = stylesheet(&book(&["1-2-3-4-5"]), &config);
        assert!(!css.contains("story-color-1-2"));
        assert_eq!(css.matches("background-color").count(), 5);
    }

    #[test]
    fn colour_parameters_come_from_config() {
        let config = LedgerConfig {
            color_saturation: 50,
            color_lightness: 40,
            ..LedgerConfig::default()
        };
        assert!(stylesheet(&book(&["1"]), &config).contains("hsl(46, 50%, 40%)"));
    }
}
