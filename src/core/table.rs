use super::error::{Error, Result};

/// Append-only arena with a hard capacity.
///
/// The table never grows past the capacity chosen at construction and never
/// removes entries, so entries are addressed by their insertion index.
#[derive(Debug, Clone)]
pub struct BoundedTable<T> {
    label: &'static str,
    capacity: usize,
    entries: Vec<T>,
}

impl<T> BoundedTable<T> {
    /// Creates an empty table; `label` names it in capacity errors
    pub fn new(label: &'static str, capacity: usize) -> Self {
        BoundedTable {
            label,
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry and returns its index
    pub fn push(&mut self, entry: T) -> Result<usize> {
        if self.is_full() {
            return Err(Error::capacity(self.label, self.capacity));
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    /// Mutable entry at `index`
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)
    }

    /// Index of the first entry matching `pred`
    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.entries.iter().position(pred)
    }

    /// First entry matching `pred`
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<&T> {
        self.entries.iter().find(|e| pred(e))
    }

    /// Entries in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true once the capacity is reached
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut table = BoundedTable::new("test table", 2);
        assert_eq!(table.push('a').unwrap(), 0);
        assert_eq!(table.push('b').unwrap(), 1);
        assert!(table.is_full());

        match table.push('c') {
            Err(Error::CapacityExceeded { table: label, capacity }) => {
                assert_eq!(label, "test table");
                assert_eq!(capacity, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_lookup() {
        let mut table = BoundedTable::new("test table", 4);
        table.push(10).unwrap();
        table.push(20).unwrap();

        assert_eq!(table.get(1), Some(&20));
        assert_eq!(table.get(2), None);
        assert_eq!(table.position(|v| *v == 20), Some(1));
        assert_eq!(table.find(|v| *v > 15), Some(&20));

        *table.get_mut(0).unwrap() = 11;
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), vec![11, 20]);
    }
}
