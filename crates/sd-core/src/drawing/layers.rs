//! Layer naming and component ownership

use std::collections::{BTreeMap, HashSet};

use sd_kernel::ComponentInfo;

use crate::assembly::AssemblyManifest;

/// Layer holding primitives whose source part is unknown
pub const UNASSIGNED_LAYER: &str = "UNASSIGNED";

const FORBIDDEN: &[char] = &['<', '>', '/', '\\', '"', ':', ';', '?', '*', '|', '=', ','];

/// Make `name` usable as a DXF layer name
pub fn sanitize_layer_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "part".into()
    } else {
        cleaned
    }
}

/// Sanitised, collision-free layer names in input order
///
/// Layer names compare case-insensitively in DXF, so `Bolt` and `BOLT`
/// collide. The reserved unassigned layer is never handed out.
pub fn derive_layer_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::from([UNASSIGNED_LAYER.to_string()]);
    let mut layers = Vec::new();
    for name in names {
        let base = sanitize_layer_name(name);
        let mut layer = base.clone();
        let mut i = 1;
        while !taken.insert(layer.to_uppercase()) {
            i += 1;
            layer = format!("{}_{}", base, i);
        }
        layers.push(layer);
    }
    layers
}

/// Mapping from compound components to part layers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceManifest {
    layers: Vec<String>,
    /// Component index to index into `layers`
    component_layers: BTreeMap<usize, usize>,
}

impl SourceManifest {
    /// One layer per assembled part, in manifest order
    pub fn from_assembly(manifest: &AssemblyManifest) -> Self {
        let layers = derive_layer_names(manifest.entries.iter().map(|e| e.label.as_str()));
        let component_layers = manifest
            .entries
            .iter()
            .enumerate()
            .flat_map(|(layer, entry)| entry.components.iter().map(move |&c| (c, layer)))
            .collect();
        Self {
            layers,
            component_layers,
        }
    }

    /// One layer per body of a plain STEP file
    ///
    /// A single body takes the part name. With several bodies, each uses its
    /// own name or the numbered part name.
    pub fn from_components(components: &[ComponentInfo], part: &str) -> Self {
        let names: Vec<String> = components
            .iter()
            .map(|c| match &c.name {
                _ if components.len() == 1 => part.to_string(),
                Some(name) if !name.trim().is_empty() => name.clone(),
                _ => format!("{}_{}", part, c.index + 1),
            })
            .collect();
        let layers = derive_layer_names(names.iter().map(String::as_str));

        let component_layers = components
            .iter()
            .enumerate()
            .map(|(layer, component)| (component.index, layer))
            .collect();
        Self {
            layers,
            component_layers,
        }
    }

    /// Part layers, without the unassigned layer
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Layer of compound component `index`
    pub fn layer_for(&self, component: usize) -> Option<&str> {
        self.component_layers
            .get(&component)
            .and_then(|&layer| self.layers.get(layer))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::ManifestEntry;
    use crate::placement::Placement;
    use sd_kernel::{BoundingBox, LengthUnit};
    use uuid::Uuid;

    fn entry(label: &str, components: Vec<usize>) -> ManifestEntry {
        ManifestEntry {
            part_id: Uuid::new_v4(),
            label: label.into(),
            source: format!("{}.stp", label).into(),
            placement: Placement::IDENTITY,
            components,
            bbox: BoundingBox::empty(),
        }
    }

    #[test]
    fn test_sanitize_layer_name() {
        assert_eq!(sanitize_layer_name("M6 x 20"), "M6 x 20");
        assert_eq!(sanitize_layer_name("a/b:c*d"), "a_b_c_d");
        assert_eq!(sanitize_layer_name("  "), "part");
    }

    #[test]
    fn test_derive_layer_names_are_unique() {
        assert_eq!(
            derive_layer_names(["bolt", "Bolt", "bolt", "UNASSIGNED", "a|b", "a_b"]),
            vec!["bolt", "Bolt_2", "bolt_3", "UNASSIGNED_2", "a_b", "a_b_2"]
        );
    }

    #[test]
    fn test_layers_from_assembly() {
        let manifest = AssemblyManifest {
            unit: LengthUnit::Millimeter,
            entries: vec![entry("base", vec![0, 1]), entry("lid", vec![2])],
        };
        let source = SourceManifest::from_assembly(&manifest);
        assert_eq!(source.layers(), ["base", "lid"]);
        assert_eq!(source.layer_for(1), Some("base"));
        assert_eq!(source.layer_for(2), Some("lid"));
        assert_eq!(source.layer_for(3), None);
    }

    #[test]
    fn test_huge_component_index_is_only_a_key() {
        let manifest = AssemblyManifest {
            unit: LengthUnit::Millimeter,
            entries: vec![entry("base", vec![usize::MAX])],
        };
        let source = SourceManifest::from_assembly(&manifest);
        assert_eq!(source.layer_for(usize::MAX), Some("base"));
        assert_eq!(source.layer_for(0), None);
    }

    #[test]
    fn test_layers_from_components() {
        let single = [ComponentInfo {
            index: 0,
            name: Some("cylinder".into()),
        }];
        assert_eq!(SourceManifest::from_components(&single, "shaft").layers(), ["shaft"]);

        let several = [
            ComponentInfo {
                index: 0,
                name: Some("hub".into()),
            },
            ComponentInfo {
                index: 1,
                name: None,
            },
        ];
        let source = SourceManifest::from_components(&several, "wheel");
        assert_eq!(source.layers(), ["hub", "wheel_2"]);
        assert_eq!(source.layer_for(1), Some("wheel_2"));
    }
}
