use std::borrow::Cow;

/// Siblings that carry a dense zero-based position.
pub trait Ordered {
    fn id(&self) -> &str;
    fn set_order(&mut self, order: i64);
}

/// Rewrites every `order` to the item's position.
pub fn renumber<T: Ordered>(items: &mut [T]) {
    for (idx, item) in items.iter_mut().enumerate() {
        item.set_order(idx as i64);
    }
}

/// Removes the item at `from` and reinserts it at `to` (an index into the
/// list after removal). Equal or out-of-range indices hand back the input.
pub fn move_item<T: Ordered + Clone>(items: &[T], from: usize, to: usize) -> Cow<'_, [T]> {
    let len = items.len();
    if from == to || from >= len || to >= len {
        return Cow::Borrowed(items);
    }
    let mut out = items.to_vec();
    let moved = out.remove(from);
    out.insert(to, moved);
    renumber(&mut out);
    Cow::Owned(out)
}

/// Drag-end events report the dragged item and the item it was dropped on.
pub fn move_by_id<'a, T: Ordered + Clone>(
    items: &'a [T],
    active_id: &str,
    over_id: &str,
) -> Cow<'a, [T]> {
    let from = items.iter().position(|i| i.id() == active_id);
    let to = items.iter().position(|i| i.id() == over_id);
    match (from, to) {
        (Some(from), Some(to)) => move_item(items, from, to),
        _ => Cow::Borrowed(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        order: i64,
    }

    impl Ordered for Item {
        fn id(&self) -> &str {
            &self.id
        }
        fn set_order(&mut self, order: i64) {
            self.order = order;
        }
    }

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Item {
                id: id.to_string(),
                order: i as i64,
            })
            .collect()
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn every_valid_move_keeps_ids_and_dense_orders() {
        let base = items(&["a", "b", "c", "d", "e"]);
        for from in 0..base.len() {
            for to in 0..base.len() {
                let moved = move_item(&base, from, to);
                let mut sorted = ids(&moved);
                sorted.sort_unstable();
                assert_eq!(sorted, vec!["a", "b", "c", "d", "e"]);
                for (idx, item) in moved.iter().enumerate() {
                    assert_eq!(item.order, idx as i64);
                }
                assert_eq!(moved[to].id, base[from].id);
            }
        }
    }

    #[test]
    fn same_index_returns_the_input() {
        let base = items(&["a", "b", "c"]);
        let moved = move_item(&base, 1, 1);
        assert!(matches!(moved, Cow::Borrowed(_)));
        assert_eq!(moved.as_ref(), base.as_slice());
    }

    #[test]
    fn out_of_range_is_a_no_op() {
        let base = items(&["a", "b"]);
        assert!(matches!(move_item(&base, 2, 0), Cow::Borrowed(_)));
        assert!(matches!(move_item(&base, 0, 5), Cow::Borrowed(_)));
        let empty: Vec<Item> = Vec::new();
        assert!(move_item(&empty, 0, 0).is_empty());
    }

    #[test]
    fn forward_and_backward_moves() {
        let base = items(&["a", "b", "c", "d"]);
        assert_eq!(ids(&move_item(&base, 0, 2)), vec!["b", "c", "a", "d"]);
        assert_eq!(ids(&move_item(&base, 3, 1)), vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn move_by_id_resolves_drag_targets() {
        let base = items(&["a", "b", "c"]);
        assert_eq!(ids(&move_by_id(&base, "c", "a")), vec!["c", "a", "b"]);
        assert!(matches!(
            move_by_id(&base, "zzz", "a"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn renumber_fills_gaps() {
        let mut list = vec![
            Item {
                id: "x".into(),
                order: 4,
            },
            Item {
                id: "y".into(),
                order: 9,
            },
        ];
        renumber(&mut list);
        assert_eq!(list[0].order, 0);
        assert_eq!(list[1].order, 1);
    }
}
