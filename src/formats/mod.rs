//! Source formats and the registry that selects one by name.
//!
//! Each format is a [`SourceFormat`] wrapped in a [`DataConverter`]; the
//! registry hands out a fresh converter per import session.

mod bicycle;
mod geo_points;
mod internal;
mod tracking_camera;

use std::collections::BTreeMap;

use crate::{
    calculator::{
        CategoryCalculator, ColumnCalculator, ConstantCalculator, FlagCalculator, SourceColumn,
    },
    column::Column,
    converter::{Converter, DataConverter, SourceFormat},
    error::ImportError,
    table::SourceSet,
};

pub use bicycle::Bicycle;
pub use geo_points::GeoPoints;
pub use internal::Internal;
pub use tracking_camera::{RecordingIndex, TrackingCamera};

type Factory = fn() -> Box<dyn Converter>;

fn converter_for<F>() -> Box<dyn Converter>
where
    F: SourceFormat + Default + 'static,
{
    Box::new(DataConverter::new(F::default()))
}

pub struct FormatRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: Factory) {
        self.factories.insert(name, factory);
    }

    /// Registered format names in alphabetical order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Converter>, ImportError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ImportError::UnknownFormat(name.to_string()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(bicycle::NAME, converter_for::<Bicycle>);
        registry.register(geo_points::NAME, converter_for::<GeoPoints>);
        registry.register(internal::NAME, converter_for::<Internal>);
        registry.register(tracking_camera::NAME, converter_for::<TrackingCamera>);
        registry
    }
}

/// True when the column exists and has at least one non-empty cell.
fn supplies(source: &SourceSet, column: &SourceColumn) -> bool {
    column
        .cells(source)
        .is_some_and(|cells| cells.iter().any(Option::is_some))
}

fn optional_category(
    source: &SourceSet,
    target: Column,
    column: SourceColumn,
) -> Box<dyn ColumnCalculator> {
    if supplies(source, &column) {
        Box::new(CategoryCalculator::new(target, column))
    } else {
        Box::new(ConstantCalculator::null(target))
    }
}

fn optional_flag(
    source: &SourceSet,
    target: Column,
    column: SourceColumn,
    default: bool,
) -> Box<dyn ColumnCalculator> {
    if supplies(source, &column) {
        Box::new(FlagCalculator::new(target, column, default))
    } else {
        Box::new(ConstantCalculator::null(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_enumerates_all_formats() {
        let registry = FormatRegistry::default();
        assert_eq!(
            registry.names(),
            vec!["bicycle", "geo_points", "internal", "tracking_camera"]
        );
        for name in registry.names() {
            let converter = registry.create(name).unwrap();
            assert_eq!(converter.name(), name);
        }
    }

    #[test]
    fn unknown_format_is_an_error() {
        let registry = FormatRegistry::default();
        assert!(matches!(
            registry.create("gpx"),
            Err(ImportError::UnknownFormat(name)) if name == "gpx"
        ));
    }

    #[test]
    fn internal_format_uses_semicolons() {
        let registry = FormatRegistry::default();
        assert_eq!(registry.create("internal").unwrap().get_separator(), b';');
        assert_eq!(registry.create("geo_points").unwrap().get_separator(), b',');
    }
}
