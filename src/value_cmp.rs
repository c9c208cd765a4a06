use crate::Value;
use std::cmp::Ordering;

// Total order over values so they can key ordered maps. Values of different
// types order by their type id; within one key column all values share a
// type, so that branch never decides anything meaningful.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(first), Value::Int(second)) => first.cmp(second),
            (Value::UInt(first), Value::UInt(second)) => first.cmp(second),
            (Value::RowID(first), Value::RowID(second)) => first.cmp(second),
            (Value::Varchar(first), Value::Varchar(second)) => first.cmp(second),
            _ => (self.get_id() as u64).cmp(&(other.get_id() as u64)),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use crate::{RowID, Value};

    #[test]
    fn test_same_type_ordering() {
        assert!(Value::UInt(3) < Value::UInt(33));
        assert!(Value::Int(-4) < Value::Int(0));
        assert!(Value::RowID(RowID(1)) < Value::RowID(RowID(2)));
        assert!(Value::from("abc") < Value::from("abd"));
    }

    #[test]
    fn test_mixed_type_ordering_is_total() {
        // cross-type comparisons fall back on the type id, never panic
        assert!(Value::Int(100) < Value::UInt(0));
        assert!(Value::UInt(100) < Value::RowID(RowID(0)));
    }
}
