use crate::core::types::RecordId;

/// Record IDs sharing one indexed value.
/// Note: Sorted by RecordId so set operations are linear merges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    pub ids: Vec<RecordId>,  // Sorted, no duplicates
}

impl PostingList {
    pub fn new() -> Self {
        PostingList { ids: Vec::new() }
    }

    /// Build from arbitrary IDs, sorting and dropping duplicates.
    pub fn from_unsorted(mut ids: Vec<RecordId>) -> Self {
        ids.sort();
        ids.dedup();
        PostingList { ids }
    }

    pub fn insert(&mut self, id: RecordId) {
        if let Err(pos) = self.ids.binary_search(&id) {
            self.ids.insert(pos, id);
        }
    }

    pub fn remove(&mut self, id: &RecordId) -> bool {
        match self.ids.binary_search(id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids.binary_search(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordId> {
        self.ids.iter()
    }

    pub fn into_vec(self) -> Vec<RecordId> {
        self.ids
    }

    /// Intersect two posting lists (simple linear merge)
    pub fn intersect(&self, other: &PostingList) -> PostingList {
        let mut result = Vec::new();
        let mut i = 0;
        let mut j = 0;

        while i < self.ids.len() && j < other.ids.len() {
            let a = &self.ids[i];
            let b = &other.ids[j];

            if a == b {
                result.push(a.clone());
                i += 1;
                j += 1;
            } else if a < b {
                i += 1;
            } else {
                j += 1;
            }
        }

        PostingList { ids: result }
    }

    pub fn union(&self, other: &PostingList) -> PostingList {
        let mut result = Vec::with_capacity(self.ids.len() + other.ids.len());
        let mut i = 0;
        let mut j = 0;

        while i < self.ids.len() && j < other.ids.len() {
            let a = &self.ids[i];
            let b = &other.ids[j];

            if a == b {
                result.push(a.clone());
                i += 1;
                j += 1;
            } else if a < b {
                result.push(a.clone());
                i += 1;
            } else {
                result.push(b.clone());
                j += 1;
            }
        }
        result.extend_from_slice(&self.ids[i..]);
        result.extend_from_slice(&other.ids[j..]);

        PostingList { ids: result }
    }

    /// IDs in `self` but not in `other`.
    pub fn difference(&self, other: &PostingList) -> PostingList {
        let mut result = Vec::new();
        let mut j = 0;

        for id in &self.ids {
            while j < other.ids.len() && other.ids[j] < *id {
                j += 1;
            }
            if j < other.ids.len() && other.ids[j] == *id {
                continue;
            }
            result.push(id.clone());
        }

        PostingList { ids: result }
    }

    /// IDs in exactly one of the two lists.
    pub fn symmetric_difference(&self, other: &PostingList) -> PostingList {
        let mut result = Vec::new();
        let mut i = 0;
        let mut j = 0;

        while i < self.ids.len() && j < other.ids.len() {
            let a = &self.ids[i];
            let b = &other.ids[j];

            if a == b {
                i += 1;
                j += 1;
            } else if a < b {
                result.push(a.clone());
                i += 1;
            } else {
                result.push(b.clone());
                j += 1;
            }
        }
        result.extend_from_slice(&self.ids[i..]);
        result.extend_from_slice(&other.ids[j..]);

        PostingList { ids: result }
    }
}

impl FromIterator<RecordId> for PostingList {
    fn from_iter<I: IntoIterator<Item = RecordId>>(iter: I) -> Self {
        PostingList::from_unsorted(iter.into_iter().collect())
    }
}
