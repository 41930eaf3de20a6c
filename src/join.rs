use itertools::{EitherOrBoth, Itertools};

#[derive(Debug, PartialEq)]
pub struct KeyVal<K, V> {
    pub key: K,
    pub val: V,
}

/// Merge two sequences of `KeyVal`, each ordered by `KeyVal.key`
/// and without duplicate keys. Keys present in only one of the
/// sequences are kept, as `EitherOrBoth::Left` or `Right`.
pub fn keyval_outer_join_2<K: Ord, V1, V2>(
    a: impl IntoIterator<Item = KeyVal<K, V1>>,
    b: impl IntoIterator<Item = KeyVal<K, V2>>,
) -> impl Iterator<Item = KeyVal<K, EitherOrBoth<V1, V2>>> {
    a.into_iter()
        .merge_join_by(b, |a, b| a.key.cmp(&b.key))
        .map(|eob| match eob {
            EitherOrBoth::Both(a, b) => KeyVal {
                key: a.key,
                val: EitherOrBoth::Both(a.val, b.val),
            },
            EitherOrBoth::Left(a) => KeyVal {
                key: a.key,
                val: EitherOrBoth::Left(a.val),
            },
            EitherOrBoth::Right(b) => KeyVal {
                key: b.key,
                val: EitherOrBoth::Right(b.val),
            },
        })
}

/// Turn a map into a sequence that can be joined.
pub fn keyvals<'m, K: Copy + 'm, V: 'm>(
    map: impl IntoIterator<Item = (&'m K, &'m V)>,
) -> impl Iterator<Item = KeyVal<K, &'m V>> {
    map.into_iter().map(|(key, val)| KeyVal { key: *key, val })
}
