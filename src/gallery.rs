//! Template gallery: the user's templates kept in memory and mirrored to a store.

use crate::error::StorageError;
use crate::storage::TemplateStore;
use crate::template::Template;

/// Most templates the gallery keeps; older entries are dropped first.
pub const DEFAULT_MAX_TEMPLATES: usize = 10;
/// Entries kept when the store is out of space.
pub const DEFAULT_DEGRADED_KEEP: usize = 3;

/// What a successful save had to give up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Templates removed to respect the gallery limit or the store quota.
    pub dropped: Vec<Template>,
    /// True when the store was full and the list was truncated before retrying.
    pub degraded: bool,
}

pub struct TemplateGallery {
    store: Box<dyn TemplateStore>,
    /// Oldest first.
    templates: Vec<Template>,
    max_templates: usize,
    degraded_keep: usize,
}

impl TemplateGallery {
    pub fn new(store: Box<dyn TemplateStore>) -> Self {
        Self {
            store,
            templates: Vec::new(),
            max_templates: DEFAULT_MAX_TEMPLATES,
            degraded_keep: DEFAULT_DEGRADED_KEEP,
        }
    }

    pub fn with_limits(mut self, max_templates: usize, degraded_keep: usize) -> Self {
        self.max_templates = max_templates.max(1);
        self.degraded_keep = degraded_keep.clamp(1, self.max_templates);
        self
    }

    /// Load from the store. A read failure leaves the gallery empty.
    pub fn load(&mut self) -> Result<usize, StorageError> {
        match self.store.list() {
            Ok(templates) => {
                self.templates = templates;
                log::info!("gallery: loaded {} templates", self.templates.len());
                Ok(self.templates.len())
            }
            Err(err) => {
                log::warn!("gallery: failed to read templates, using empty list: {}", err);
                self.templates.clear();
                Err(err)
            }
        }
    }

    pub fn list(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Most recently added template.
    pub fn latest(&self) -> Option<&Template> {
        self.templates.last()
    }

    /// Exact case-insensitive name first, then the first name containing `query`.
    pub fn find_by_name(&self, query: &str) -> Option<&Template> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        self.templates
            .iter()
            .find(|t| t.name.to_lowercase() == query)
            .or_else(|| {
                self.templates
                    .iter()
                    .find(|t| t.name.to_lowercase().contains(&query))
            })
    }

    /// Append a template, dropping the oldest beyond the gallery limit, and save.
    ///
    /// A template with an existing id replaces the stored one.
    pub fn add(&mut self, template: Template) -> Result<SaveReport, StorageError> {
        let mut next = self.templates.clone();
        next.retain(|t| t.id != template.id);
        next.push(template);

        let mut dropped = Vec::new();
        if next.len() > self.max_templates {
            let excess = next.len() - self.max_templates;
            dropped.extend(next.drain(..excess));
        }

        let mut report = self.persist(next)?;
        dropped.append(&mut report.dropped);
        report.dropped = dropped;
        Ok(report)
    }

    /// Delete by id and save. Returns the removed template and what the save
    /// had to give up when the store was full.
    pub fn remove(&mut self, id: &str) -> Result<Option<(Template, SaveReport)>, StorageError> {
        let Some(pos) = self.templates.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        let mut next = self.templates.clone();
        let removed = next.remove(pos);
        let report = self.persist(next)?;
        Ok(Some((removed, report)))
    }

    /// Save `next`; on a full store keep only the newest entries and retry once.
    fn persist(&mut self, mut next: Vec<Template>) -> Result<SaveReport, StorageError> {
        match self.store.save(&next) {
            Ok(()) => {
                self.templates = next;
                Ok(SaveReport::default())
            }
            Err(err) if err.is_capacity() => {
                log::warn!(
                    "gallery: {}; keeping the {} most recent templates",
                    err,
                    self.degraded_keep
                );
                let excess = next.len().saturating_sub(self.degraded_keep);
                let dropped: Vec<Template> = next.drain(..excess).collect();
                match self.store.save(&next) {
                    Ok(()) => {
                        self.templates = next;
                        Ok(SaveReport {
                            dropped,
                            degraded: true,
                        })
                    }
                    Err(retry_err) => {
                        log::error!("gallery: save failed after truncation: {}", retry_err);
                        Err(retry_err)
                    }
                }
            }
            Err(err) => {
                log::error!("gallery: save failed: {}", err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::storage::MemoryTemplateStore;
    use crate::template::tests::PNG_MAGIC;

    fn template(name: &str) -> Template {
        Template::new(name, "", "", PNG_MAGIC).unwrap()
    }

    /// Store that refuses every write.
    struct FailingStore;

    impl TemplateStore for FailingStore {
        fn list(&mut self) -> Result<Vec<Template>, StorageError> {
            Err(StorageError::Backend("unavailable".into()))
        }

        fn save(&mut self, _templates: &[Template]) -> Result<(), StorageError> {
            Err(StorageError::CapacityExceeded { needed: 1, quota: 0 })
        }
    }

    /// Store that refuses lists longer than a shared limit.
    struct LimitedStore(Arc<AtomicUsize>);

    impl TemplateStore for LimitedStore {
        fn list(&mut self) -> Result<Vec<Template>, StorageError> {
            Ok(Vec::new())
        }

        fn save(&mut self, templates: &[Template]) -> Result<(), StorageError> {
            let limit = self.0.load(Ordering::SeqCst);
            if templates.len() > limit {
                return Err(StorageError::CapacityExceeded {
                    needed: templates.len(),
                    quota: limit,
                });
            }
            Ok(())
        }
    }

    #[test]
    fn eleventh_template_drops_the_oldest() {
        let mut gallery = TemplateGallery::new(Box::new(MemoryTemplateStore::new()));
        for i in 0..10 {
            gallery.add(template(&format!("item {i}"))).unwrap();
        }
        let report = gallery.add(template("item 10")).unwrap();

        assert_eq!(gallery.len(), 10);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].name, "item 0");
        assert_eq!(gallery.list()[0].name, "item 1");
        assert_eq!(gallery.latest().unwrap().name, "item 10");
    }

    #[test]
    fn full_store_truncates_and_retries_once() {
        // Room for a few small templates only.
        let mut gallery = TemplateGallery::new(Box::new(MemoryTemplateStore::with_quota(600)));
        let mut degraded = None;
        for i in 0..8 {
            let report = gallery.add(template(&format!("item {i}"))).unwrap();
            if report.degraded {
                degraded = Some(report);
                break;
            }
        }

        let report = degraded.expect("quota should force a degraded save");
        assert_eq!(gallery.len(), DEFAULT_DEGRADED_KEEP);
        assert!(!report.dropped.is_empty());
        assert!(gallery.find_by_name(&report.dropped[0].name).is_none());
    }

    #[test]
    fn failed_retry_leaves_gallery_untouched() {
        let mut gallery = TemplateGallery::new(Box::new(FailingStore));
        assert!(gallery.load().is_err());
        assert!(gallery.is_empty());

        let err = gallery.add(template("keys")).unwrap_err();
        assert!(err.is_capacity());
        assert!(gallery.is_empty());
    }

    #[test]
    fn find_prefers_exact_name() {
        let mut gallery = TemplateGallery::new(Box::new(MemoryTemplateStore::new()));
        gallery.add(template("car keys")).unwrap();
        gallery.add(template("Keys")).unwrap();

        assert_eq!(gallery.find_by_name("keys").unwrap().name, "Keys");
        assert_eq!(gallery.find_by_name("car").unwrap().name, "car keys");
        assert!(gallery.find_by_name("wallet").is_none());
    }

    #[test]
    fn remove_deletes_by_id_and_persists() {
        let mut gallery = TemplateGallery::new(Box::new(MemoryTemplateStore::new()));
        let keys = template("keys");
        let id = keys.id.clone();
        gallery.add(keys).unwrap();
        gallery.add(template("wallet")).unwrap();

        let (removed, report) = gallery.remove(&id).unwrap().unwrap();
        assert_eq!(removed.name, "keys");
        assert_eq!(report, SaveReport::default());
        assert!(gallery.get(&id).is_none());
        assert!(gallery.remove(&id).unwrap().is_none());

        gallery.load().unwrap();
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn remove_on_full_store_reports_what_was_dropped() {
        let limit = Arc::new(AtomicUsize::new(10));
        let mut gallery = TemplateGallery::new(Box::new(LimitedStore(limit.clone())));
        for i in 0..6 {
            gallery.add(template(&format!("item {i}"))).unwrap();
        }
        let newest = gallery.latest().unwrap().id.clone();

        limit.store(4, Ordering::SeqCst);
        let (removed, report) = gallery.remove(&newest).unwrap().unwrap();

        assert_eq!(removed.name, "item 5");
        assert!(report.degraded);
        let dropped: Vec<_> = report.dropped.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(dropped, ["item 0", "item 1"]);
        let kept: Vec<_> = gallery.list().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(kept, ["item 2", "item 3", "item 4"]);
    }
}
