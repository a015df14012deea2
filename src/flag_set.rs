//! FlagSet Module for the Binder Compiler
//!
//! A fixed-width bit vector split into 64-bit buckets. Every dirty flag,
//! invalidate flag and should-read flag in a compilation unit is a `FlagSet`
//! with the same bucket count once the layout is sealed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr};
use thiserror::Error;

/// Number of flag bits held by one bucket.
pub const BUCKET_SIZE: usize = 64;

/// Number of buckets needed to hold `bit_count` bits (never zero).
pub fn buckets_for(bit_count: usize) -> usize {
    bit_count.div_ceil(BUCKET_SIZE).max(1)
}

/// Raised when a set that already carries a name is given a different one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("flag set already localized as `{existing}`, refusing `{requested}`")]
pub struct AlreadyLocalized {
    pub existing: String,
    pub requested: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSet {
    buckets: Vec<u64>,
    /// Generated variable this set is aliased to. Only the emitter reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_name: Option<String>,
    /// Dynamic sets are instance fields, the rest are static constants.
    #[serde(default)]
    is_dynamic: bool,
}

impl FlagSet {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            buckets: vec![0; bucket_count],
            local_name: None,
            is_dynamic: false,
        }
    }

    /// A set with exactly one bit.
    pub fn of(bit: usize) -> Self {
        let mut set = Self::new(bit / BUCKET_SIZE + 1);
        set.set(bit);
        set
    }

    pub fn from_bits<I>(bits: I, bucket_count: usize) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut set = Self::new(bucket_count);
        for bit in bits {
            set.set(bit);
        }
        set
    }

    pub fn from_buckets(buckets: Vec<u64>) -> Self {
        Self {
            buckets,
            local_name: None,
            is_dynamic: false,
        }
    }

    /// Every bit of every bucket set.
    pub fn filled(bucket_count: usize) -> Self {
        Self::from_buckets(vec![u64::MAX; bucket_count])
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Bucket value, zero past the end.
    pub fn bucket(&self, index: usize) -> u64 {
        self.buckets.get(index).copied().unwrap_or(0)
    }

    /// Copy of the bits resized to `bucket_count`, dropping the name.
    pub fn with_bucket_count(&self, bucket_count: usize) -> Self {
        let mut buckets = self.buckets.clone();
        buckets.resize(bucket_count, 0);
        Self::from_buckets(buckets)
    }

    pub fn set(&mut self, bit: usize) {
        let index = bit / BUCKET_SIZE;
        if index >= self.buckets.len() {
            self.buckets.resize(index + 1, 0);
        }
        self.buckets[index] |= 1u64 << (bit % BUCKET_SIZE);
    }

    pub fn get(&self, bit: usize) -> bool {
        self.bucket(bit / BUCKET_SIZE) & (1u64 << (bit % BUCKET_SIZE)) != 0
    }

    /// Bucket-wise OR. The result has the larger bucket count of the two.
    pub fn or(&self, other: &FlagSet) -> FlagSet {
        let len = self.buckets.len().max(other.buckets.len());
        let buckets = (0..len).map(|i| self.bucket(i) | other.bucket(i)).collect();
        FlagSet::from_buckets(buckets)
    }

    pub fn or_assign(&mut self, other: &FlagSet) {
        if other.buckets.len() > self.buckets.len() {
            self.buckets.resize(other.buckets.len(), 0);
        }
        for (mine, theirs) in self.buckets.iter_mut().zip(&other.buckets) {
            *mine |= *theirs;
        }
    }

    pub fn and(&self, other: &FlagSet) -> FlagSet {
        let buckets = (0..self.buckets.len())
            .map(|i| self.bucket(i) & other.bucket(i))
            .collect();
        FlagSet::from_buckets(buckets)
    }

    /// Bucket-wise `self & !other`, keeping the bucket count of `self`.
    pub fn and_not(&self, other: &FlagSet) -> FlagSet {
        let buckets = (0..self.buckets.len())
            .map(|i| self.bucket(i) & !other.bucket(i))
            .collect();
        FlagSet::from_buckets(buckets)
    }

    /// True if the given bucket of both sets shares a bit.
    pub fn intersects(&self, other: &FlagSet, bucket_index: usize) -> bool {
        self.bucket(bucket_index) & other.bucket(bucket_index) != 0
    }

    pub fn intersects_any(&self, other: &FlagSet) -> bool {
        (0..self.buckets.len().min(other.buckets.len())).any(|i| self.intersects(other, i))
    }

    /// Indices of the buckets in which both sets can match.
    pub fn intersecting_buckets<'a>(
        &'a self,
        other: &'a FlagSet,
    ) -> impl Iterator<Item = usize> + 'a {
        (0..self.buckets.len().min(other.buckets.len())).filter(move |&i| self.intersects(other, i))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| *b == 0)
    }

    /// Structural equality of the bucket values, ignoring the local name and
    /// trailing zero buckets.
    pub fn bits_equal(&self, other: &FlagSet) -> bool {
        let len = self.buckets.len().max(other.buckets.len());
        (0..len).all(|i| self.bucket(i) == other.bucket(i))
    }

    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        self.iter_ones().find(|bit| *bit >= from)
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .flat_map(|(index, bucket)| {
                let bucket = *bucket;
                (0..BUCKET_SIZE)
                    .filter(move |offset| bucket & (1u64 << offset) != 0)
                    .map(move |offset| index * BUCKET_SIZE + offset)
            })
    }

    pub fn count_ones(&self) -> u32 {
        self.buckets.iter().map(|b| b.count_ones()).sum()
    }

    /// `(bucket index, value)` for every bucket that is not zero.
    pub fn non_empty_buckets(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .map(|(index, value)| (index, *value))
    }

    /// Alias this set to a generated variable. Repeating the same name is a
    /// no-op; a different name is refused.
    pub fn localize(&mut self, name: impl Into<String>) -> Result<&str, AlreadyLocalized> {
        let name = name.into();
        if let Some(existing) = &self.local_name {
            if *existing != name {
                return Err(AlreadyLocalized {
                    existing: existing.clone(),
                    requested: name,
                });
            }
        } else {
            self.local_name = Some(name);
        }
        Ok(self.local_name.as_deref().unwrap_or_default())
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn set_dynamic(&mut self, is_dynamic: bool) {
        self.is_dynamic = is_dynamic;
    }

    /// Bucket values with trailing zero buckets removed; used as the
    /// identity of the bits for hashing and ordering.
    fn significant(&self) -> &[u64] {
        let len = self
            .buckets
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |last| last + 1);
        &self.buckets[..len]
    }
}

impl PartialEq for FlagSet {
    fn eq(&self, other: &Self) -> bool {
        self.bits_equal(other)
    }
}

impl Eq for FlagSet {}

impl Hash for FlagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl PartialOrd for FlagSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlagSet {
    /// Orders by bucket values, lowest bucket first.
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.buckets.len().max(other.buckets.len());
        (0..len)
            .map(|i| self.bucket(i).cmp(&other.bucket(i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl BitOr for &FlagSet {
    type Output = FlagSet;

    fn bitor(self, rhs: Self) -> FlagSet {
        self.or(rhs)
    }
}

impl BitAnd for &FlagSet {
    type Output = FlagSet;

    fn bitand(self, rhs: Self) -> FlagSet {
        self.and(rhs)
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = self.buckets.iter().map(|b| format!("{:#x}", b)).collect();
        write!(f, "{{{}}}", words.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_places_bit_in_right_bucket() {
        let set = FlagSet::of(70);
        assert_eq!(set.bucket_count(), 2);
        assert_eq!(set.bucket(0), 0);
        assert_eq!(set.bucket(1), 1 << 6);
        assert!(set.get(70));
        assert!(!set.get(6));
    }

    #[test]
    fn or_zero_extends_shorter_operand() {
        let short = FlagSet::of(1);
        let long = FlagSet::of(65);
        let merged = short.or(&long);
        assert_eq!(merged.bucket_count(), 2);
        assert_eq!(merged.iter_ones().collect::<Vec<_>>(), vec![1, 65]);
        assert_eq!(&short | &long, merged);
    }

    #[test]
    fn and_not_keeps_own_width() {
        let a = FlagSet::from_bits([0, 1, 2], 2);
        let b = FlagSet::of(1);
        let result = a.and_not(&b);
        assert_eq!(result.bucket_count(), 2);
        assert_eq!(result.iter_ones().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn intersects_checks_a_single_bucket() {
        let a = FlagSet::from_bits([3, 64], 2);
        let b = FlagSet::from_bits([64], 2);
        assert!(!a.intersects(&b, 0));
        assert!(a.intersects(&b, 1));
        assert!(a.intersects_any(&b));
        assert_eq!(a.intersecting_buckets(&b).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn bits_equal_ignores_width_and_name() {
        let mut a = FlagSet::from_bits([5], 1);
        let b = FlagSet::from_bits([5], 3);
        a.localize("mDirtyFlags").unwrap();
        assert!(a.bits_equal(&b));
        assert_eq!(a, b);
        assert!(FlagSet::new(4).is_empty());
    }

    #[test]
    fn localize_is_idempotent_and_refuses_rename() {
        let mut set = FlagSet::of(2);
        assert_eq!(set.localize("flagA").unwrap(), "flagA");
        assert_eq!(set.localize("flagA").unwrap(), "flagA");
        let err = set.localize("flagB").unwrap_err();
        assert_eq!(err.existing, "flagA");
        assert_eq!(set.local_name(), Some("flagA"));
    }

    #[test]
    fn ordering_follows_bucket_values() {
        let mut sets = vec![FlagSet::of(3), FlagSet::of(64), FlagSet::of(1)];
        sets.sort();
        let firsts: Vec<usize> = sets.iter().map(|s| s.iter_ones().next().unwrap()).collect();
        assert_eq!(firsts, vec![64, 1, 3]);
    }

    #[test]
    fn buckets_for_rounds_up() {
        assert_eq!(buckets_for(0), 1);
        assert_eq!(buckets_for(64), 1);
        assert_eq!(buckets_for(65), 2);
        assert_eq!(buckets_for(129), 3);
    }
}
