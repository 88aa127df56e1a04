//! Recursive parameter merge
//!
//! Merge semantics, applied key by key in override order:
//! - Removal marker: delete the key (absent keys are ignored)
//! - Map over map: merge recursively
//! - Anything else: override wins, including `Null` and lists

use crate::value::{ConfigMap, ConfigValue};

/// Merge `overlay` on top of `base` and return a new map.
///
/// Either side may be absent and is then treated as empty. Neither input is
/// modified. Keys keep the base order; keys only present in `overlay` are
/// appended in overlay order.
pub fn merge(base: Option<&ConfigMap>, overlay: Option<&ConfigMap>) -> ConfigMap {
    let mut merged = base.cloned().unwrap_or_default();
    let Some(overlay) = overlay else {
        return merged;
    };

    for (key, overlay_value) in overlay {
        match overlay_value {
            ConfigValue::Remove => {
                merged.remove(key);
            }
            ConfigValue::Map(overlay_map) => match merged.get_mut(key) {
                Some(ConfigValue::Map(base_map)) => {
                    let nested = merge(Some(&*base_map), Some(overlay_map));
                    *base_map = nested;
                }
                _ => {
                    merged.insert(key.clone(), overlay_value.clone());
                }
            },
            _ => {
                merged.insert(key.clone(), overlay_value.clone());
            }
        }
    }

    merged
}

/// Merge several layers in order (first is base, last has highest precedence).
pub fn merge_layers(layers: &[&ConfigMap]) -> ConfigMap {
    layers
        .iter()
        .fold(ConfigMap::new(), |acc, layer| merge(Some(&acc), Some(*layer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Remove;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        ConfigMap::try_from(value).unwrap()
    }

    fn keys(map: &ConfigMap) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_both_absent_is_empty() {
        assert!(merge(None, None).is_empty());
    }

    #[test]
    fn test_absent_side_is_identity() {
        let base = map(json!({"a": 1, "b": "two"}));
        assert_eq!(merge(Some(&base), None), base);
        assert_eq!(merge(None, Some(&base)), base);
        assert_eq!(merge(Some(&base), Some(&ConfigMap::new())), base);
        assert_eq!(merge(Some(&ConfigMap::new()), Some(&base)), base);
    }

    #[test]
    fn test_scalar_override() {
        let base = map(json!({"a": 1}));
        let overlay = map(json!({"a": 2}));
        assert_eq!(merge(Some(&base), Some(&overlay)), map(json!({"a": 2})));
    }

    #[test]
    fn test_removal() {
        let base = map(json!({"a": 1, "b": 2}));
        let overlay = ConfigMap::new().with("a", Remove);
        assert_eq!(merge(Some(&base), Some(&overlay)), map(json!({"b": 2})));
    }

    #[test]
    fn test_removal_of_absent_key_is_noop() {
        let base = map(json!({"b": 2}));
        let overlay = ConfigMap::new().with("a", Remove);
        assert_eq!(merge(Some(&base), Some(&overlay)), base);
    }

    #[test]
    fn test_nested_deep_merge() {
        let base = map(json!({"a": {"x": 1, "y": 2}}));
        let overlay = map(json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(
            merge(Some(&base), Some(&overlay)),
            map(json!({"a": {"x": 1, "y": 3, "z": 4}}))
        );
    }

    #[test]
    fn test_nested_removal_leaves_empty_map() {
        let base = map(json!({"a": {"x": 1}}));
        let overlay = ConfigMap::new().with("a", ConfigMap::new().with("x", Remove));
        assert_eq!(merge(Some(&base), Some(&overlay)), map(json!({"a": {}})));
    }

    #[test]
    fn test_null_override_is_kept() {
        let base = map(json!({"a": 1}));
        let overlay = map(json!({"a": null}));
        let merged = merge(Some(&base), Some(&overlay));
        assert_eq!(merged.get("a"), Some(&ConfigValue::Null));
        assert_eq!(merged, map(json!({"a": null})));
    }

    #[test]
    fn test_array_replace() {
        let base = map(json!({"kpts": [4, 4, 4], "keep": true}));
        let overlay = map(json!({"kpts": [1, 1]}));
        assert_eq!(
            merge(Some(&base), Some(&overlay)),
            map(json!({"kpts": [1, 1], "keep": true}))
        );
    }

    #[test]
    fn test_map_replaces_scalar_and_scalar_replaces_map() {
        let base = map(json!({"a": 1, "b": {"x": 1}}));
        let overlay = map(json!({"a": {"x": 2}, "b": "flat"}));
        assert_eq!(
            merge(Some(&base), Some(&overlay)),
            map(json!({"a": {"x": 2}, "b": "flat"}))
        );
    }

    #[test]
    fn test_key_order() {
        let base = map(json!({"c": 1, "a": 2, "b": 3}));
        let overlay = map(json!({"z": 0, "a": 9, "y": 0}));
        let merged = merge(Some(&base), Some(&overlay));
        assert_eq!(keys(&merged), vec!["c", "a", "b", "z", "y"]);
        assert_eq!(merged.get("a"), Some(&ConfigValue::Integer(9)));
    }

    #[test]
    fn test_key_order_after_removal() {
        let base = map(json!({"a": 1, "b": 2, "c": 3}));
        let overlay = ConfigMap::new().with("d", 4).with("b", Remove);
        let merged = merge(Some(&base), Some(&overlay));
        assert_eq!(keys(&merged), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_inputs_not_mutated() {
        let base = map(json!({"a": {"x": 1}, "b": [1, 2], "c": 3}));
        let overlay = ConfigMap::new()
            .with("a", ConfigMap::new().with("x", Remove).with("y", 2))
            .with("c", Remove);
        let base_before = base.clone();
        let overlay_before = overlay.clone();

        let _ = merge(Some(&base), Some(&overlay));

        assert_eq!(base, base_before);
        assert_eq!(overlay, overlay_before);
    }

    #[test]
    fn test_repeated_overlay_is_idempotent() {
        let base = map(json!({"a": {"x": 1, "y": 2}, "b": [1], "c": "keep"}));
        let overlay = map(json!({"a": {"y": 5, "z": 6}, "b": [2, 3], "d": null}));
        let once = merge(Some(&base), Some(&overlay));
        let twice = merge(Some(&once), Some(&overlay));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_layers() {
        let builtin = map(json!({"timeout": 100, "scf": {"maxiter": 50}}));
        let file = map(json!({"timeout": 200}));
        let user = map(json!({"scf": {"maxiter": 300}}));
        let cli = ConfigMap::new().with("timeout", Remove);

        let result = merge_layers(&[&builtin, &file, &user, &cli]);

        assert!(result.get("timeout").is_none());
        assert_eq!(result.get_path("scf.maxiter"), Some(&ConfigValue::Integer(300)));
    }

    #[test]
    fn test_merge_layers_empty() {
        assert!(merge_layers(&[]).is_empty());
    }

    #[test]
    fn test_override_only_subtree_keeps_marker_until_stripped() {
        let base = map(json!({"a": 1}));
        let overlay = ConfigMap::new().with("new", ConfigMap::new().with("x", Remove).with("y", 1));
        let merged = merge(Some(&base), Some(&overlay));
        assert!(merged.contains_removals());
        assert_eq!(
            merged.strip_removals(),
            map(json!({"a": 1, "new": {"y": 1}}))
        );
    }
}
