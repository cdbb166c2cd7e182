use serde::{Deserialize, Deserializer};

/// Represents a field update operation for partial updates
///
/// This type provides a clear, three-state pattern for updating optional fields:
/// - `NoChange`: Field keeps its existing value (key absent from the payload)
/// - `Set(value)`: Field is updated to the provided value
/// - `Clear`: Field is cleared (key present with `null`)
///
/// Payload structs mark these fields `#[serde(default)]` so that an absent key
/// deserializes to `NoChange` while an explicit `null` becomes `Clear`.
///
/// # Example
///
/// ```
/// use serde::Deserialize;
/// use taskboard_domain::FieldUpdate;
///
/// #[derive(Deserialize)]
/// struct Patch {
///     #[serde(default)]
///     description: FieldUpdate<String>,
/// }
///
/// let absent: Patch = serde_json::from_str("{}").unwrap();
/// assert_eq!(absent.description, FieldUpdate::NoChange);
///
/// let cleared: Patch = serde_json::from_str(r#"{"description": null}"#).unwrap();
/// assert_eq!(cleared.description, FieldUpdate::Clear);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    /// Do not modify this field (keep existing value)
    NoChange,
    /// Set the field to the provided value
    Set(T),
    /// Clear the field (set to None)
    Clear,
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::NoChange
    }
}

impl<T> FieldUpdate<T> {
    /// Apply this update to an optional field
    ///
    /// # Example
    ///
    /// ```
    /// use taskboard_domain::FieldUpdate;
    ///
    /// let mut field = Some("old value".to_string());
    /// let update = FieldUpdate::Set("new value".to_string());
    /// update.apply_to(&mut field);
    /// assert_eq!(field, Some("new value".to_string()));
    ///
    /// let clear = FieldUpdate::Clear;
    /// clear.apply_to(&mut field);
    /// assert_eq!(field, None);
    /// ```
    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            FieldUpdate::NoChange => {}
            FieldUpdate::Set(value) => *field = Some(value),
            FieldUpdate::Clear => *field = None,
        }
    }

    /// Check if this represents a change (not NoChange)
    pub fn is_change(&self) -> bool {
        !matches!(self, FieldUpdate::NoChange)
    }

    pub fn as_ref(&self) -> FieldUpdate<&T> {
        match self {
            FieldUpdate::NoChange => FieldUpdate::NoChange,
            FieldUpdate::Set(value) => FieldUpdate::Set(value),
            FieldUpdate::Clear => FieldUpdate::Clear,
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    /// Convert Option<T> to FieldUpdate<T>
    /// - Some(value) becomes Set(value)
    /// - None becomes Clear
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Clear,
        }
    }
}

impl<'de, T> Deserialize<'de> for FieldUpdate<T>
where
    T: Deserialize<'de>,
{
    /// Only called when the key is present; absence is handled by `#[serde(default)]`.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(FieldUpdate::from)
    }
}
