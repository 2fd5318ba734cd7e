//! Pure reconciliation steps: catalog flattening, category rebuilding and
//! the merge that produces the flat view.

use tracing::warn;

use crate::types::{
    Catalog, Categories, Category, DEFAULT_CATEGORY, PluginMap, PluginStatus,
    RESERVED_CATEGORIES,
};

/// Flatten `categories → plugins` into a uid-keyed map.
///
/// Reserved categories are skipped. Every entry starts `off` and records its
/// owning category. Entries whose uid cannot be derived are dropped.
pub fn flatten_catalog(catalog: &Catalog) -> PluginMap {
    let mut flat = PluginMap::new();
    for (category, group) in &catalog.categories {
        if RESERVED_CATEGORIES.contains(&category.as_str()) {
            continue;
        }
        for (key, plugin) in &group.plugins {
            let Some(uid) = plugin.resolve_uid() else {
                warn!(category = %category, plugin = %key, "catalog entry has no usable identity");
                continue;
            };
            let mut record = plugin.clone();
            record.uid = Some(uid.clone());
            record.status = PluginStatus::Off;
            record.category = Some(category.clone());
            flat.insert(uid, record);
        }
    }
    flat
}

/// Category display metadata from the catalog, without the plugin lists.
pub fn catalog_categories(catalog: &Catalog) -> Categories {
    catalog
        .categories
        .iter()
        .map(|(name, group)| (name.clone(), group.info.clone()))
        .collect()
}

/// Add every category referenced only by user plugins (`Misc` when a user
/// plugin declares none).
pub fn rebuild_categories(mut categories: Categories, plugins_user: &PluginMap) -> Categories {
    for plugin in plugins_user.values() {
        let name = plugin
            .category
            .clone()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        categories
            .entry(name.clone())
            .or_insert_with(|| Category::named(name));
    }
    categories
}

/// Merge the cached and user layers onto a freshly flattened catalog.
///
/// Cached catalog plugins contribute their status and code. User records
/// always win: they overlay a catalog entry with the same uid (marking it
/// overridden) or are inserted as-is.
pub fn merge_flat(catalog: PluginMap, plugins_local: &PluginMap, plugins_user: &PluginMap) -> PluginMap {
    let mut flat = catalog;

    for (uid, local) in plugins_local {
        if let Some(entry) = flat.get_mut(uid) {
            entry.status = local.status;
            entry.code = local.code.clone();
            entry.added_at = local.added_at;
            entry.status_changed_at = local.status_changed_at;
            entry.updated_at = local.updated_at;
        }
    }

    for (uid, user) in plugins_user {
        match flat.get_mut(uid) {
            Some(entry) => {
                entry.status = user.status;
                entry.code = user.code.clone();
                entry.user = true;
                entry.overridden = true;
                entry.added_at = user.added_at;
                entry.status_changed_at = user.status_changed_at;
                entry.updated_at = user.updated_at;
            },
            None => {
                let mut entry = user.clone();
                entry.uid = Some(uid.clone());
                entry.user = true;
                entry.overridden = false;
                flat.insert(uid.clone(), entry);
            },
        }
    }

    flat
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::PluginRecord,
        serde_json::json,
    };

    fn catalog() -> Catalog {
        Catalog::from_value(json!({
            "iitc_version": "0.38.0",
            "categories": {
                "Info": {
                    "name": "Info",
                    "description": "Display additional information",
                    "plugins": {
                        "ap-stats": {
                            "id": "ap-stats",
                            "namespace": "ns",
                            "name": "AP stats",
                            "filename": "ap-stats.user.js",
                            "status": "on"
                        },
                        "nameless": { "id": "nameless" }
                    }
                },
                "Obsolete": {
                    "name": "Obsolete",
                    "plugins": {
                        "old": { "id": "old", "namespace": "ns", "name": "Old" }
                    }
                }
            }
        }))
        .unwrap()
    }

    fn user(uid: &str, category: Option<&str>) -> PluginRecord {
        PluginRecord {
            uid: Some(uid.into()),
            category: category.map(str::to_string),
            status: PluginStatus::On,
            code: Some(format!("// user {uid}")),
            user: true,
            added_at: Some(100),
            ..Default::default()
        }
    }

    #[test]
    fn flatten_skips_reserved_and_invalid() {
        let flat = flatten_catalog(&catalog());
        assert_eq!(flat.len(), 1);
        let entry = &flat["AP stats+ns"];
        assert_eq!(entry.status, PluginStatus::Off);
        assert_eq!(entry.category.as_deref(), Some("Info"));
        assert_eq!(entry.uid.as_deref(), Some("AP stats+ns"));
    }

    #[test]
    fn categories_keep_reserved_without_plugins() {
        let cats = catalog_categories(&catalog());
        assert!(cats.contains_key("Obsolete"));
        assert_eq!(cats["Info"].description, "Display additional information");
        assert!(!cats["Info"].extra.contains_key("plugins"));
    }

    #[test]
    fn rebuild_adds_user_categories() {
        let mut plugins_user = PluginMap::new();
        plugins_user.insert("a+b".into(), user("a+b", None));
        plugins_user.insert("c+d".into(), user("c+d", Some("Tweaks")));
        plugins_user.insert("e+f".into(), user("e+f", Some("Info")));

        let cats = rebuild_categories(catalog_categories(&catalog()), &plugins_user);
        assert_eq!(cats["Misc"], Category::named("Misc"));
        assert_eq!(cats["Tweaks"].name.as_deref(), Some("Tweaks"));
        assert_eq!(cats["Info"].description, "Display additional information");
    }

    #[test]
    fn merge_applies_local_then_user() {
        let fresh = flatten_catalog(&catalog());

        let mut local = PluginMap::new();
        let mut cached = fresh["AP stats+ns"].clone();
        cached.status = PluginStatus::On;
        cached.code = Some("// catalog".into());
        local.insert("AP stats+ns".into(), cached);

        let merged = merge_flat(fresh.clone(), &local, &PluginMap::new());
        assert_eq!(merged["AP stats+ns"].status, PluginStatus::On);
        assert_eq!(merged["AP stats+ns"].code.as_deref(), Some("// catalog"));
        assert!(!merged["AP stats+ns"].user);

        let mut users = PluginMap::new();
        users.insert("AP stats+ns".into(), user("AP stats+ns", None));
        users.insert("mine+ns".into(), user("mine+ns", Some("Misc")));
        let merged = merge_flat(fresh, &local, &users);

        let shadowed = &merged["AP stats+ns"];
        assert!(shadowed.user && shadowed.overridden);
        assert_eq!(shadowed.code.as_deref(), Some("// user AP stats+ns"));
        assert_eq!(shadowed.category.as_deref(), Some("Info"));

        let mine = &merged["mine+ns"];
        assert!(mine.user && !mine.overridden);
        assert_eq!(mine.status, PluginStatus::On);
    }

    #[test]
    fn merge_ignores_local_orphans() {
        let mut local = PluginMap::new();
        local.insert("gone+ns".into(), user("gone+ns", None));
        let merged = merge_flat(PluginMap::new(), &local, &PluginMap::new());
        assert!(merged.is_empty());
    }
}
