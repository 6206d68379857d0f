//! Category editing session for one wiki page.
//!
//! [`Categorizer`] owns the link table, the staged batch and the wiki client.
//! In multi-edit mode changes are staged and written by [`Categorizer::save_all`];
//! otherwise every change is saved as its own edit. Saving takes `&mut self`,
//! so two saves against the same page can never interleave.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{CategoryLookupApi, PageEditApi, ResolvedCategory};
use crate::batch::{BatchFailure, EditBatch, PendingOperation, StageHandle};
use crate::config::WikiConfig;
use crate::editor::PageTextEditor;
use crate::error::EditFailure;
use crate::hooks::HookRegistry;
use crate::operations::OperationFactory;
use crate::staging::{LinkId, LinkRecord, LinkState, StagingStore};
use crate::title::{CategoryRef, NamespaceAliasSet, normalize_category_name, same_category};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizerOptions {
    pub multi_edit: bool,
    pub resolve_redirects: bool,
    pub enabled_namespaces: Vec<i32>,
    pub summary_suffix: Option<String>,
}

impl Default for CategorizerOptions {
    fn default() -> Self {
        Self {
            multi_edit: true,
            resolve_redirects: true,
            enabled_namespaces: Vec::new(),
            summary_suffix: None,
        }
    }
}

impl CategorizerOptions {
    pub fn from_config(config: &WikiConfig) -> Self {
        let section = &config.categorizer;
        Self {
            multi_edit: section.multi_edit,
            resolve_redirects: section.resolve_redirects,
            enabled_namespaces: section.enabled_namespaces.clone(),
            summary_suffix: section.summary_suffix.clone(),
        }
    }

    pub fn allows_namespace(&self, namespace: i32) -> bool {
        self.enabled_namespaces.is_empty() || self.enabled_namespaces.contains(&namespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Edit(#[from] EditFailure),
    #[error(transparent)]
    Batch(#[from] BatchFailure),
}

impl SessionError {
    pub fn failure(&self) -> &EditFailure {
        match self {
            Self::Edit(failure) => failure,
            Self::Batch(batch) => &batch.failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub page: String,
    pub summary: String,
    pub description: String,
    pub applied: usize,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChangeOutcome {
    Staged { link: LinkId, handle: StageHandle },
    Saved(SaveReport),
    Reset { link: LinkId },
    Unchanged,
}

pub struct Categorizer<A> {
    api: A,
    page: String,
    namespace: i32,
    options: CategorizerOptions,
    factory: OperationFactory,
    batch: EditBatch,
    links: StagingStore,
    reason: Option<String>,
}

impl<A> Categorizer<A>
where
    A: PageEditApi + CategoryLookupApi,
{
    /// Load the page's categories and refuse pages outside the enabled namespaces.
    pub fn open(
        mut api: A,
        page: &str,
        namespaces: NamespaceAliasSet,
        hooks: HookRegistry,
        options: CategorizerOptions,
    ) -> Result<Self, SessionError> {
        let info = api.page_info(page)?;
        if !options.allows_namespace(info.namespace) {
            warn!(page = %info.title, namespace = info.namespace, "category editing disabled here");
            return Err(EditFailure::namespace_disabled(info.title, info.namespace).into());
        }
        let links = StagingStore::from_categories(
            info.categories
                .iter()
                .map(|category| normalize_category_name(category, &namespaces)),
        );
        info!(
            page = %info.title,
            namespace = info.namespace,
            categories = links.len(),
            multi_edit = options.multi_edit,
            "opened page for category editing"
        );

        Ok(Self {
            api,
            page: info.title,
            namespace: info.namespace,
            options,
            factory: OperationFactory::new(PageTextEditor::new(namespaces), Arc::new(hooks)),
            batch: EditBatch::new(),
            links,
            reason: None,
        })
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn namespace(&self) -> i32 {
        self.namespace
    }

    pub fn namespaces(&self) -> &NamespaceAliasSet {
        self.factory.editor().namespaces()
    }

    pub fn options(&self) -> &CategorizerOptions {
        &self.options
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn batch(&self) -> &EditBatch {
        &self.batch
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links.iter()
    }

    pub fn link(&self, id: LinkId) -> Option<&LinkRecord> {
        self.links.get(id)
    }

    pub fn find_link(&self, category: &str) -> Option<LinkId> {
        self.links.find(category, self.namespaces())
    }

    /// Free text appended to the edit summary of every following save.
    pub fn set_reason(&mut self, reason: Option<String>) {
        self.reason = reason.filter(|value| !value.trim().is_empty());
    }

    /// Add a category given as `Name` or `Name|sort key`.
    pub fn add(&mut self, input: &str) -> Result<ChangeOutcome, SessionError> {
        let (category, exists) = self.resolve_target(input)?;
        if self.find_link(&category.name).is_some() {
            return Err(EditFailure::duplicate(category.name).into());
        }
        let name = category.name.clone();
        let operation = self.factory.add(category);

        if !self.options.multi_edit {
            let report = self.save_now(operation)?;
            let id = self.links.insert(name, LinkState::Unchanged);
            self.set_exists(id, exists);
            return Ok(ChangeOutcome::Saved(report));
        }

        let id = self.links.insert(name, LinkState::Added);
        self.set_exists(id, exists);
        let handle = self.batch.stage(operation.with_link(id));
        self.links.mark(id, LinkState::Added, handle);
        Ok(ChangeOutcome::Staged { link: id, handle })
    }

    /// Point the link to `old` at the category given in `new_input`.
    pub fn edit(&mut self, old: &str, new_input: &str) -> Result<ChangeOutcome, SessionError> {
        let namespaces = self.namespaces().clone();
        let old_name = normalize_category_name(old, &namespaces);
        let record = self
            .find_link(&old_name)
            .and_then(|id| self.links.get(id))
            .filter(|record| record.state != LinkState::Removed)
            .cloned()
            .ok_or_else(|| EditFailure::not_found(&old_name))?;
        let id = record.id;

        let (category, exists) = self.resolve_target(new_input)?;
        if same_category(&record.category, &category.name, &namespaces)
            && category.sort_key.is_none()
        {
            debug!(category = %record.category, "edit keeps the same category");
            return Ok(ChangeOutcome::Unchanged);
        }
        if let Some(other) = self.find_link(&category.name)
            && other != id
        {
            // Undo a staged rename first; its source is the link that goes.
            let source = if record.state == LinkState::Changed {
                self.links.reset(id, &mut self.batch);
                self.links
                    .get(id)
                    .map(|link| link.category.clone())
                    .unwrap_or_else(|| record.category.clone())
            } else {
                record.category.clone()
            };
            info!(
                from = %source,
                to = %category.name,
                "target already on the page; removing the old category instead"
            );
            return self.delete(&source);
        }

        match record.state {
            LinkState::Added => {
                if let Some(slot) = record.stash {
                    self.batch.cancel(slot);
                }
                if let Some(link) = self.links.get_mut(id) {
                    link.category = category.name.clone();
                    link.exists = exists;
                }
                let handle = self.batch.stage(self.factory.add(category).with_link(id));
                self.links.mark(id, LinkState::Added, handle);
                Ok(ChangeOutcome::Staged { link: id, handle })
            }
            LinkState::Changed => {
                let original = record
                    .original
                    .clone()
                    .unwrap_or_else(|| record.category.clone());
                if same_category(&original, &category.name, &namespaces)
                    && category.sort_key.is_none()
                {
                    self.links.reset(id, &mut self.batch);
                    return Ok(ChangeOutcome::Reset { link: id });
                }
                if let Some(slot) = record.stash {
                    self.batch.cancel(slot);
                }
                self.links.rename(id, category.name.clone());
                self.set_exists(id, exists);
                let handle = self
                    .batch
                    .stage(self.factory.edit(&original, category).with_link(id));
                self.links.mark(id, LinkState::Changed, handle);
                Ok(ChangeOutcome::Staged { link: id, handle })
            }
            LinkState::Unchanged | LinkState::Removed => {
                let name = category.name.clone();
                let operation = self.factory.edit(&record.category, category);
                if !self.options.multi_edit {
                    let report = self.save_now(operation)?;
                    if let Some(link) = self.links.get_mut(id) {
                        link.category = name;
                        link.exists = exists;
                    }
                    return Ok(ChangeOutcome::Saved(report));
                }
                self.links.rename(id, name);
                self.set_exists(id, exists);
                let handle = self.batch.stage(operation.with_link(id));
                self.links.mark(id, LinkState::Changed, handle);
                Ok(ChangeOutcome::Staged { link: id, handle })
            }
        }
    }

    /// Remove a category. Unsaved additions and edits are cancelled instead.
    pub fn delete(&mut self, name: &str) -> Result<ChangeOutcome, SessionError> {
        let namespaces = self.namespaces().clone();
        let name = normalize_category_name(name, &namespaces);
        let record = self
            .find_link(&name)
            .and_then(|id| self.links.get(id))
            .cloned()
            .ok_or_else(|| EditFailure::not_found(&name))?;
        let id = record.id;

        match record.state {
            LinkState::Removed => Ok(ChangeOutcome::Unchanged),
            LinkState::Added | LinkState::Changed => {
                self.links.reset(id, &mut self.batch);
                Ok(ChangeOutcome::Reset { link: id })
            }
            LinkState::Unchanged => {
                let operation = self.factory.delete(&record.category).with_link(id);
                if !self.options.multi_edit {
                    let report = self.save_now(operation)?;
                    self.links.remove(id);
                    return Ok(ChangeOutcome::Saved(report));
                }
                let handle = self.batch.stage(operation);
                self.links.mark(id, LinkState::Removed, handle);
                Ok(ChangeOutcome::Staged { link: id, handle })
            }
        }
    }

    /// Undo the unsaved change on one link.
    pub fn cancel(&mut self, link: LinkId) -> Option<PendingOperation> {
        self.links.reset(link, &mut self.batch)
    }

    pub fn cancel_all(&mut self) -> Vec<PendingOperation> {
        self.links.reset_all(&mut self.batch)
    }

    /// Write every staged change as one edit.
    ///
    /// The batch is only drained once the wiki accepted the new text; any
    /// failure leaves it and the link table untouched.
    pub fn save_all(&mut self) -> Result<SaveReport, SessionError> {
        if self.batch.is_empty() {
            return Ok(SaveReport {
                page: self.page.clone(),
                summary: String::new(),
                description: String::new(),
                applied: 0,
                changed: false,
            });
        }
        let report = submit_batch(
            &mut self.api,
            &self.page,
            &self.batch,
            self.reason.as_deref(),
            self.options.summary_suffix.as_deref(),
        )?;
        self.batch.cancel_all();
        self.links.settle();
        Ok(report)
    }

    fn save_now(&mut self, operation: PendingOperation) -> Result<SaveReport, SessionError> {
        let mut batch = EditBatch::new();
        batch.stage(operation);
        submit_batch(
            &mut self.api,
            &self.page,
            &batch,
            self.reason.as_deref(),
            self.options.summary_suffix.as_deref(),
        )
    }

    fn resolve_target(&mut self, input: &str) -> Result<(CategoryRef, bool), SessionError> {
        let requested = CategoryRef::parse_input(input, self.namespaces())?;
        if !self.options.resolve_redirects {
            return Ok((requested, true));
        }
        let resolved: ResolvedCategory = self.api.resolve(&requested.name)?;
        if let Some(from) = &resolved.redirected_from {
            debug!(from = %from, to = %resolved.canonical_name, "followed category redirect");
        }
        let category = CategoryRef::new(&resolved.canonical_name, self.namespaces())?
            .with_sort_key(requested.sort_key.as_deref());
        Ok((category, resolved.exists))
    }

    fn set_exists(&mut self, id: LinkId, exists: bool) {
        if let Some(link) = self.links.get_mut(id) {
            link.exists = exists;
        }
    }
}

fn submit_batch<A: PageEditApi>(
    api: &mut A,
    page: &str,
    batch: &EditBatch,
    reason: Option<&str>,
    suffix: Option<&str>,
) -> Result<SaveReport, SessionError> {
    let revision = api.fetch_current_text(page)?;
    let outcome = batch.apply(&revision.text)?;
    let summary = compose_summary(&outcome.summary, reason, suffix);
    let changed = outcome.text != revision.text;

    if changed {
        api.submit_text(
            page,
            &outcome.text,
            &summary,
            &revision.edit_token,
            revision.base_timestamp.as_deref(),
        )
        .inspect_err(|failure| warn!(page, %failure, "saving category changes failed"))?;
        info!(page, applied = outcome.applied, summary = %summary, "saved category changes");
    } else {
        info!(page, applied = outcome.applied, "page text unchanged; nothing submitted");
    }

    Ok(SaveReport {
        page: page.to_string(),
        summary,
        description: outcome.description,
        applied: outcome.applied,
        changed,
    })
}

/// `summary: reason suffix`, leaving out whatever is empty.
pub fn compose_summary(summary: &str, reason: Option<&str>, suffix: Option<&str>) -> String {
    let tail: Vec<&str> = [reason, suffix]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if tail.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}: {}", tail.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        Categorizer, CategorizerOptions, ChangeOutcome, SessionError, compose_summary,
    };
    use crate::api::{CategoryLookupApi, PageEditApi, PageInfo, PageRevision, ResolvedCategory};
    use crate::error::{EditFailure, EditResult};
    use crate::hooks::{HookKind, HookRegistry, HookRejected};
    use crate::staging::LinkState;
    use crate::title::NamespaceAliasSet;

    const PAGE: &str = "Test page";

    #[derive(Default)]
    struct MockApi {
        text: String,
        namespace: i32,
        categories: Vec<String>,
        redirects: BTreeMap<String, String>,
        missing: Vec<String>,
        submitted: Vec<(String, String)>,
        fetches: usize,
        conflict: bool,
    }

    impl MockApi {
        fn with_text(text: &str, categories: &[&str]) -> Self {
            Self {
                text: text.to_string(),
                categories: categories.iter().map(|name| (*name).to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl PageEditApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> EditResult<()> {
            Ok(())
        }

        fn fetch_current_text(&mut self, page: &str) -> EditResult<PageRevision> {
            self.fetches += 1;
            Ok(PageRevision {
                title: page.to_string(),
                namespace: self.namespace,
                text: self.text.clone(),
                edit_token: "token+\\".to_string(),
                base_timestamp: Some("2026-01-01T00:00:00Z".to_string()),
            })
        }

        fn submit_text(
            &mut self,
            _page: &str,
            text: &str,
            summary: &str,
            edit_token: &str,
            base_timestamp: Option<&str>,
        ) -> EditResult<()> {
            assert_eq!(edit_token, "token+\\");
            assert!(base_timestamp.is_some());
            if self.conflict {
                return Err(EditFailure::RemoteConflict);
            }
            self.submitted.push((text.to_string(), summary.to_string()));
            self.text = text.to_string();
            Ok(())
        }
    }

    impl CategoryLookupApi for MockApi {
        fn resolve(&mut self, category: &str) -> EditResult<ResolvedCategory> {
            let target = self.redirects.get(category).cloned();
            let canonical_name = target.clone().unwrap_or_else(|| category.to_string());
            Ok(ResolvedCategory {
                exists: !self.missing.contains(&canonical_name),
                canonical_name,
                redirected_from: target.map(|_| category.to_string()),
            })
        }

        fn suggest(&mut self, prefix: &str, limit: usize) -> EditResult<Vec<String>> {
            Ok(self
                .categories
                .iter()
                .filter(|name| name.starts_with(prefix))
                .take(limit)
                .cloned()
                .collect())
        }

        fn page_info(&mut self, page: &str) -> EditResult<PageInfo> {
            Ok(PageInfo {
                title: page.to_string(),
                namespace: self.namespace,
                categories: self.categories.clone(),
            })
        }

        fn category_namespaces(&mut self) -> EditResult<NamespaceAliasSet> {
            Ok(NamespaceAliasSet::default())
        }

        fn request_count(&self) -> usize {
            self.fetches
        }
    }

    fn open(api: MockApi) -> Categorizer<MockApi> {
        open_with(api, CategorizerOptions::default(), HookRegistry::new())
    }

    fn open_with(
        api: MockApi,
        options: CategorizerOptions,
        hooks: HookRegistry,
    ) -> Categorizer<MockApi> {
        Categorizer::open(api, PAGE, NamespaceAliasSet::default(), hooks, options).expect("open")
    }

    fn single_edit() -> CategorizerOptions {
        CategorizerOptions {
            multi_edit: false,
            ..CategorizerOptions::default()
        }
    }

    fn names(session: &Categorizer<MockApi>) -> Vec<String> {
        session.links().map(|link| link.category.clone()).collect()
    }

    #[test]
    fn staged_changes_save_as_one_edit() {
        let api = MockApi::with_text("Intro\n[[Category:Old]]\n[[Category:Gone]]\n", &["Old", "Gone"]);
        let mut session = open_with(
            api,
            CategorizerOptions {
                summary_suffix: Some("via wikicat".to_string()),
                ..CategorizerOptions::default()
            },
            HookRegistry::new(),
        );
        session.set_reason(Some("cleanup".to_string()));

        session.add("Fresh|key").expect("add");
        session.edit("Old", "New").expect("edit");
        session.delete("Gone").expect("delete");
        assert_eq!(session.batch().len(), 3);
        assert!(session.api().submitted.is_empty());

        let report = session.save_all().expect("save");
        assert!(report.changed);
        assert_eq!(report.applied, 3);
        assert_eq!(
            report.summary,
            "+[[Category:Fresh]], [[Category:Old]] -> [[Category:New]], -[[Category:Gone]]: cleanup via wikicat"
        );
        assert_eq!(
            report.description,
            "Add category \"Fresh\"\nChange category \"Old\" to \"New\"\nRemove category \"Gone\""
        );
        let (text, _) = &session.api().submitted[0];
        assert_eq!(text, "Intro\n[[Category:New]]\n[[Category:Fresh|key]]\n");

        assert!(session.batch().is_empty());
        assert_eq!(names(&session), ["New", "Fresh"]);
        assert!(session.links().all(|link| link.state == LinkState::Unchanged));
    }

    #[test]
    fn add_refuses_category_already_listed() {
        let mut session = open(MockApi::with_text("[[Category:Foo bar]]", &["Foo bar"]));
        let error = session.add("foo_bar").expect_err("duplicate");
        assert_eq!(error, SessionError::Edit(EditFailure::duplicate("Foo bar")));

        session.add("Other").expect("add");
        let error = session.add("other").expect_err("duplicate of staged add");
        assert!(matches!(error.failure(), EditFailure::DuplicateCategory { .. }));
    }

    #[test]
    fn add_follows_redirects_and_flags_missing_categories() {
        let mut api = MockApi::with_text("Text", &[]);
        api.redirects.insert("Colour".to_string(), "Color".to_string());
        api.missing.push("Nowhere".to_string());
        let mut session = open(api);

        session.add("Colour").expect("add");
        session.add("Nowhere").expect("add");
        let links: Vec<_> = session
            .links()
            .map(|link| (link.category.clone(), link.exists))
            .collect();
        assert_eq!(
            links,
            [("Color".to_string(), true), ("Nowhere".to_string(), false)]
        );
    }

    #[test]
    fn disabled_resolution_passes_names_through() {
        let mut api = MockApi::with_text("Text", &[]);
        api.redirects.insert("Colour".to_string(), "Color".to_string());
        let mut session = open_with(
            api,
            CategorizerOptions {
                resolve_redirects: false,
                ..CategorizerOptions::default()
            },
            HookRegistry::new(),
        );
        session.add("Colour").expect("add");
        assert_eq!(names(&session), ["Colour"]);
    }

    #[test]
    fn edit_to_same_category_is_a_no_op() {
        let mut session = open(MockApi::with_text("[[Category:Foo]]", &["Foo"]));
        let outcome = session.edit("Foo", "foo").expect("edit");
        assert_eq!(outcome, ChangeOutcome::Unchanged);
        assert!(session.batch().is_empty());
    }

    #[test]
    fn edit_to_present_category_removes_old_one() {
        let mut session = open(MockApi::with_text(
            "[[Category:A]]\n[[Category:B]]\n",
            &["A", "B"],
        ));
        session.edit("A", "B").expect("edit");
        let staged: Vec<_> = session
            .batch()
            .iter()
            .map(|(_, operation)| operation.summary_fragment.clone())
            .collect();
        assert_eq!(staged, ["-[[Category:A]]"]);

        let report = session.save_all().expect("save");
        assert_eq!(session.api().submitted[0].0, "[[Category:B]]\n");
        assert_eq!(report.applied, 1);
        assert_eq!(names(&session), ["B"]);
    }

    #[test]
    fn renamed_link_moved_onto_present_category_removes_its_source() {
        let mut session = open(MockApi::with_text(
            "[[Category:A]]\n[[Category:B]]\n",
            &["A", "B"],
        ));
        session.edit("A", "X").expect("rename");
        let outcome = session.edit("X", "B").expect("rename onto B");
        assert!(matches!(outcome, ChangeOutcome::Staged { .. }));
        assert_eq!(session.batch().len(), 1);
        assert_eq!(session.batch().summary(), "-[[Category:A]]");
        assert_eq!(names(&session), ["A", "B"]);

        let report = session.save_all().expect("save");
        assert!(report.changed);
        assert_eq!(session.api().submitted.len(), 1);
        assert_eq!(session.api().submitted[0].0, "[[Category:B]]\n");
        assert_eq!(names(&session), ["B"]);
    }

    #[test]
    fn editing_an_added_link_restages_the_add() {
        let mut session = open(MockApi::with_text("Text\n", &[]));
        let first = session.add("A").expect("add");
        let second = session.edit("A", "B").expect("edit");
        let (ChangeOutcome::Staged { link: a, .. }, ChangeOutcome::Staged { link: b, .. }) =
            (first, second)
        else {
            panic!("expected staged outcomes");
        };
        assert_eq!(a, b);
        assert_eq!(session.batch().len(), 1);
        assert_eq!(session.batch().summary(), "+[[Category:B]]");

        session.save_all().expect("save");
        assert_eq!(session.api().submitted[0].0, "Text\n[[Category:B]]\n");
    }

    #[test]
    fn editing_a_changed_link_keeps_the_original_source() {
        let mut session = open(MockApi::with_text("[[Category:A|k]]\n", &["A"]));
        session.edit("A", "B").expect("edit");
        session.edit("B", "C").expect("edit again");
        assert_eq!(session.batch().summary(), "[[Category:A]] -> [[Category:C]]");

        let outcome = session.edit("C", "A").expect("back to original");
        assert!(matches!(outcome, ChangeOutcome::Reset { .. }));
        assert!(session.batch().is_empty());
        assert_eq!(names(&session), ["A"]);
    }

    #[test]
    fn delete_cancels_unsaved_changes() {
        let mut session = open(MockApi::with_text("[[Category:Old]]\n", &["Old"]));
        session.add("Fresh").expect("add");
        session.edit("Old", "New").expect("edit");
        assert_eq!(session.batch().len(), 2);

        assert!(matches!(
            session.delete("Fresh").expect("delete added"),
            ChangeOutcome::Reset { .. }
        ));
        assert!(matches!(
            session.delete("New").expect("delete changed"),
            ChangeOutcome::Reset { .. }
        ));
        assert!(session.batch().is_empty());
        assert_eq!(names(&session), ["Old"]);
    }

    #[test]
    fn deleting_twice_is_a_no_op() {
        let mut session = open(MockApi::with_text("[[Category:Old]]\n", &["Old"]));
        assert!(matches!(
            session.delete("Old").expect("delete"),
            ChangeOutcome::Staged { .. }
        ));
        assert_eq!(session.delete("Old").expect("again"), ChangeOutcome::Unchanged);
        assert_eq!(session.batch().len(), 1);

        let error = session.edit("Old", "New").expect_err("removed link");
        assert_eq!(error.failure(), &EditFailure::not_found("Old"));
    }

    #[test]
    fn cancel_and_cancel_all_restore_links() {
        let mut session = open(MockApi::with_text("[[Category:A]]\n[[Category:B]]\n", &["A", "B"]));
        let ChangeOutcome::Staged { link, handle } = session.delete("A").expect("delete") else {
            panic!("expected staged delete");
        };
        session.delete("B").expect("delete");
        let cancelled = session.cancel(link).expect("cancelled");
        assert_eq!(cancelled.category, "A");
        assert!(!session.batch().contains(handle));
        assert_eq!(session.batch().len(), 1);

        session.add("C").expect("add");
        let mut dropped: Vec<String> = session
            .cancel_all()
            .into_iter()
            .map(|operation| operation.category)
            .collect();
        dropped.sort();
        assert_eq!(dropped, ["B", "C"]);
        assert!(session.batch().is_empty());
        assert_eq!(names(&session), ["A", "B"]);
        assert!(session.links().all(|link| link.state == LinkState::Unchanged));
    }

    #[test]
    fn single_edit_mode_saves_each_change() {
        let mut session = open_with(
            MockApi::with_text("Body\n[[Category:Old]]\n", &["Old"]),
            single_edit(),
            HookRegistry::new(),
        );
        let outcome = session.add("Fresh").expect("add");
        assert!(matches!(outcome, ChangeOutcome::Saved(ref report) if report.changed));
        session.edit("Old", "New").expect("edit");
        session.delete("Fresh").expect("delete");

        let summaries: Vec<_> = session
            .api()
            .submitted
            .iter()
            .map(|(_, summary)| summary.as_str())
            .collect();
        assert_eq!(
            summaries,
            [
                "+[[Category:Fresh]]",
                "[[Category:Old]] -> [[Category:New]]",
                "-[[Category:Fresh]]"
            ]
        );
        assert_eq!(session.api().text, "Body\n[[Category:New]]\n");
        assert!(session.batch().is_empty());
        assert_eq!(names(&session), ["New"]);
    }

    #[test]
    fn pages_outside_enabled_namespaces_are_refused() {
        let mut api = MockApi::with_text("Text", &[]);
        api.namespace = 2;
        let options = CategorizerOptions {
            enabled_namespaces: vec![0, 14],
            ..CategorizerOptions::default()
        };
        let error = Categorizer::open(
            api,
            PAGE,
            NamespaceAliasSet::default(),
            HookRegistry::new(),
            options,
        )
        .err()
        .expect("refused");
        assert_eq!(error.failure(), &EditFailure::namespace_disabled(PAGE, 2));
    }

    #[test]
    fn failed_step_keeps_batch_and_submits_nothing() {
        // Listed by the wiki but only present through a template.
        let mut session = open(MockApi::with_text("{{Stub}}\n", &["Stubs"]));
        session.add("Fresh").expect("add");
        session.delete("Stubs").expect("delete");

        let error = session.save_all().expect_err("not in text");
        let SessionError::Batch(failure) = &error else {
            panic!("expected batch failure, got {error:?}");
        };
        assert_eq!(failure.position, 1);
        assert_eq!(failure.failure, EditFailure::not_found("Stubs"));
        assert_eq!(session.batch().len(), 2);
        assert!(session.api().submitted.is_empty());
    }

    #[test]
    fn remote_conflict_keeps_batch() {
        let mut api = MockApi::with_text("Text\n", &[]);
        api.conflict = true;
        let mut session = open(api);
        session.add("Fresh").expect("add");

        let error = session.save_all().expect_err("conflict");
        assert_eq!(error, SessionError::Edit(EditFailure::RemoteConflict));
        assert_eq!(session.batch().len(), 1);
        assert!(session.links().any(|link| link.state == LinkState::Added));
    }

    #[test]
    fn hook_rejection_aborts_save() {
        let mut hooks = HookRegistry::new();
        hooks.register(HookKind::BeforeAdd, |_, category, _| {
            if category == "Forbidden" {
                Err(HookRejected)
            } else {
                Ok(String::new())
            }
        });
        let mut session = open_with(MockApi::with_text("Text", &[]), single_edit(), hooks);
        let error = session.add("Forbidden").expect_err("rejected");
        assert_eq!(error.failure(), &EditFailure::hook_aborted("Forbidden"));
        assert!(session.find_link("Forbidden").is_none());
    }

    #[test]
    fn empty_save_does_not_touch_the_wiki() {
        let mut session = open(MockApi::with_text("Text", &[]));
        let report = session.save_all().expect("save");
        assert!(!report.changed);
        assert_eq!(report.applied, 0);
        assert_eq!(session.api().fetches, 0);
    }

    #[test]
    fn add_then_delete_submits_nothing() {
        let mut session = open(MockApi::with_text("Text\n", &["Keep"]));
        session.add("A").expect("add");
        session.edit("A", "B").expect("edit");
        session.delete("B").expect("delete");
        assert!(session.batch().is_empty());
        let report = session.save_all().expect("save");
        assert!(!report.changed);
        assert!(session.api().submitted.is_empty());
    }

    #[test]
    fn summary_composition() {
        assert_eq!(compose_summary("+[[Category:A]]", None, None), "+[[Category:A]]");
        assert_eq!(
            compose_summary("+[[Category:A]]", Some(" tidy "), Some("")),
            "+[[Category:A]]: tidy"
        );
        assert_eq!(
            compose_summary("-[[Category:B]]", None, Some("(bot)")),
            "-[[Category:B]]: (bot)"
        );
    }
}
