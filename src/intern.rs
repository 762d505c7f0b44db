//! Hash-consing of immutable values.
//!
//! Equal values interned in the same [`Dictionary`] share one allocation,
//! so equality of [`Id`]s is a pointer comparison.

use {
    hashbrown::HashSet,
    parking_lot::Mutex,
    std::{
        fmt::{self, Debug},
        hash::{Hash, Hasher},
        ops::Deref,
        sync::Arc,
    },
};

/// Identity of an interned value.
pub struct Id<T>(Arc<T>);

impl<T> Id<T> {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn value(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Id(self.0.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state)
    }
}

impl<T> Deref for Id<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Debug> Debug for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Id({:p}, {:?})", Arc::as_ptr(&self.0), self.0)
    }
}

/// Content-addressed intern table.
pub struct Dictionary<T> {
    values: Mutex<HashSet<Arc<T>>>,
}

impl<T> Debug for Dictionary<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Dictionary")
            .field("len", &self.values.lock().len())
            .finish()
    }
}

impl<T> Default for Dictionary<T> {
    fn default() -> Self {
        Dictionary {
            values: Mutex::new(HashSet::new()),
        }
    }
}

impl<T> Dictionary<T>
where
    T: Hash + Eq,
{
    pub fn new() -> Self {
        Dictionary::default()
    }

    /// Returns identity of the value, inserting it if no equal value is present.
    pub fn look_up(&self, value: T) -> Id<T> {
        let mut values = self.values.lock();
        if let Some(existing) = values.get(&value) {
            return Id(existing.clone());
        }

        let value = Arc::new(value);
        values.insert(value.clone());
        Id(value)
    }

    /// Drops values no longer referenced by any [`Id`].
    pub fn purge(&self) {
        self.values.lock().retain(|value| Arc::strong_count(value) > 1);
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_identity() {
        let dictionary = Dictionary::new();
        let a = dictionary.look_up(vec![1, 2, 3]);
        let b = dictionary.look_up(vec![1, 2, 3]);
        let c = dictionary.look_up(vec![3, 2, 1]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(dictionary.len(), 2);

        drop(c);
        dictionary.purge();
        assert_eq!(dictionary.len(), 1);
        assert_eq!(*a, vec![1, 2, 3]);
    }
}
