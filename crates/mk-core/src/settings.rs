//! Typed, per-model configuration groups.
//!
//! A [`SettingsMap`] stores at most one value per concrete type. Estimation
//! routines and model families look up their own settings type and fall back
//! to defaults when the group is absent. Inserting a group of a type already
//! present replaces the old value.

use std::any::{Any, TypeId};

/// A configuration group storable in a [`SettingsMap`].
///
/// Blanket-implemented for every `'static` type that is `Clone + Send +
/// Sync`; there is nothing to implement by hand.
pub trait Settings: Any + Send + Sync {
    /// Clone behind the trait object.
    fn clone_box(&self) -> Box<dyn Settings>;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + Send + Sync> Settings for T {
    fn clone_box(&self) -> Box<dyn Settings> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Heterogeneous map of configuration groups, keyed by concrete type.
///
/// Cloning the map clones every group, so a copied model carries
/// independent configuration.
#[derive(Default)]
pub struct SettingsMap {
    groups: Vec<(TypeId, Box<dyn Settings>)>,
}

impl SettingsMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the group of type `T`, if attached.
    pub fn get<T: Settings>(&self) -> Option<&T> {
        let id = TypeId::of::<T>();
        self.groups
            .iter()
            .find(|(k, _)| *k == id)
            .and_then(|(_, v)| (**v).as_any().downcast_ref::<T>())
    }

    /// Mutable lookup of the group of type `T`.
    pub fn get_mut<T: Settings>(&mut self) -> Option<&mut T> {
        let id = TypeId::of::<T>();
        self.groups
            .iter_mut()
            .find(|(k, _)| *k == id)
            .and_then(|(_, v)| (**v).as_any_mut().downcast_mut::<T>())
    }

    /// Attach a group, replacing any existing group of the same type.
    pub fn insert<T: Settings>(&mut self, value: T) {
        self.remove::<T>();
        self.groups.push((TypeId::of::<T>(), Box::new(value)));
    }

    /// Detach and drop the group of type `T`; true if one was present.
    pub fn remove<T: Settings>(&mut self) -> bool {
        let id = TypeId::of::<T>();
        let before = self.groups.len();
        self.groups.retain(|(k, _)| *k != id);
        self.groups.len() != before
    }

    /// Look up the group of type `T`, inserting `default()` first if absent.
    pub fn get_or_insert_with<T: Settings>(&mut self, default: impl FnOnce() -> T) -> &mut T {
        if !self.contains::<T>() {
            self.insert(default());
        }
        // just inserted or already present
        self.get_mut::<T>().unwrap()
    }

    /// True if a group of type `T` is attached.
    pub fn contains<T: Settings>(&self) -> bool {
        let id = TypeId::of::<T>();
        self.groups.iter().any(|(k, _)| *k == id)
    }

    /// Number of attached groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True if no groups are attached.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Clone for SettingsMap {
    fn clone(&self) -> Self {
        Self {
            groups: self
                .groups
                .iter()
                .map(|(k, v)| (*k, (**v).clone_box()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for SettingsMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsMap")
            .field("groups", &self.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Knobs {
        tol: f64,
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Flags {
        verbose: bool,
    }

    #[test]
    fn test_insert_get_remove() {
        let mut map = SettingsMap::new();
        assert!(map.is_empty());
        map.insert(Knobs { tol: 1e-6 });
        map.insert(Flags { verbose: true });
        assert_eq!(map.len(), 2);
        assert_eq!(map.get::<Knobs>().unwrap().tol, 1e-6);
        assert!(map.remove::<Knobs>());
        assert!(!map.remove::<Knobs>());
        assert!(map.get::<Knobs>().is_none());
        assert!(map.get::<Flags>().unwrap().verbose);
    }

    #[test]
    fn test_insert_replaces() {
        let mut map = SettingsMap::new();
        map.insert(Knobs { tol: 1e-6 });
        map.insert(Knobs { tol: 1e-3 });
        assert_eq!(map.len(), 1);
        assert_eq!(map.get::<Knobs>().unwrap().tol, 1e-3);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut map = SettingsMap::new();
        map.insert(Knobs { tol: 1.0 });
        let copy = map.clone();
        map.get_mut::<Knobs>().unwrap().tol = 2.0;
        assert_eq!(copy.get::<Knobs>().unwrap().tol, 1.0);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map = SettingsMap::new();
        map.get_or_insert_with(|| Knobs { tol: 0.5 }).tol = 0.25;
        assert_eq!(map.get::<Knobs>().unwrap().tol, 0.25);
        let k = map.get_or_insert_with(|| Knobs { tol: 9.9 });
        assert_eq!(k.tol, 0.25);
    }
}
