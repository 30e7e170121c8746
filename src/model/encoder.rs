use serde::{Deserialize, Serialize};

/// Bijective mapping between tag strings and dense class indices.
///
/// Classes are the distinct labels in lexicographic order, so the index of a
/// tag depends only on the set of labels, never on their input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Fit over a sequence of labels (duplicates allowed).
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Rebuild from a stored class list. Returns `None` unless the list is
    /// strictly increasing (sorted and unique).
    pub fn from_classes(classes: Vec<String>) -> Option<Self> {
        if classes.windows(2).all(|w| w[0] < w[1]) {
            Some(Self { classes })
        } else {
            None
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn transform(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
    }

    /// Encode every label; `None` if any label is unknown.
    pub fn transform_all<S: AsRef<str>>(&self, labels: &[S]) -> Option<Vec<usize>> {
        labels.iter().map(|l| self.transform(l.as_ref())).collect()
    }

    pub fn inverse(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sorts_and_dedups() {
        let enc = LabelEncoder::fit(&["rock", "jazz", "rock", "ambient"]);
        assert_eq!(enc.classes(), ["ambient", "jazz", "rock"]);
        assert_eq!(enc.len(), 3);
    }

    #[test]
    fn test_bijection() {
        let enc = LabelEncoder::fit(&["rock", "jazz", "blues"]);
        for (i, class) in enc.classes().iter().enumerate() {
            assert_eq!(enc.transform(class), Some(i));
            assert_eq!(enc.inverse(i), Some(class.as_str()));
        }
        assert_eq!(enc.transform("polka"), None);
        assert_eq!(enc.inverse(3), None);
    }

    #[test]
    fn test_index_independent_of_input_order() {
        let a = LabelEncoder::fit(&["rock", "jazz"]);
        let b = LabelEncoder::fit(&["jazz", "rock"]);
        assert_eq!(a, b);
        assert_eq!(a.transform_all(&["rock", "jazz", "rock"]), Some(vec![1, 0, 1]));
    }

    #[test]
    fn test_from_classes_validates() {
        assert!(LabelEncoder::from_classes(vec!["a".into(), "b".into()]).is_some());
        assert!(LabelEncoder::from_classes(vec!["b".into(), "a".into()]).is_none());
        assert!(LabelEncoder::from_classes(vec!["a".into(), "a".into()]).is_none());
    }
}
