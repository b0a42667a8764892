//! Versioned field wrapper.
//!
//! Each aircraft field carries the data version at which its value last
//! changed. The rule is mechanical: an incoming value restamps the field
//! only when it actually differs from the current one, and an absent value
//! never touches it. Wrapping every field in [`Versioned`] enforces the
//! rule in one place instead of repeating it per field.

/// An optional field value paired with its changed-at version stamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Versioned<T> {
    value: Option<T>,
    changed_at: Option<i64>,
}

impl<T: PartialEq> Versioned<T> {
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// The version at which the value last changed, or `None` if the field
    /// never left its default.
    pub fn changed_at(&self) -> Option<i64> {
        self.changed_at
    }

    pub fn is_some(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_none(&self) -> bool {
        self.value.is_none()
    }

    /// Set the value, stamping `version` only on a genuine change.
    /// Returns whether the field changed.
    pub fn set(&mut self, value: T, version: i64) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        self.value = Some(value);
        self.changed_at = Some(version);
        true
    }

    /// Merge a possibly-absent incoming value: absent never overwrites,
    /// present wins under the `set` rule. Returns whether the field changed.
    pub fn merge(&mut self, incoming: Option<T>, version: i64) -> bool {
        match incoming {
            Some(value) => self.set(value, version),
            None => false,
        }
    }
}

impl<T: Clone> Versioned<T> {
    pub fn value(&self) -> Option<T> {
        self.value.clone()
    }
}
