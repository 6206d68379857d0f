//! Builders that turn a requested change into a [`PendingOperation`].
//!
//! Each transform runs the `before*` hooks on the incoming text, the editor
//! operation, then the `after*` hooks. A rejected hook or a failed edit aborts
//! the whole transform.

use std::sync::Arc;

use crate::batch::{OperationKind, PendingOperation};
use crate::editor::PageTextEditor;
use crate::hooks::{HookKind, HookRegistry};
use crate::title::CategoryRef;

#[derive(Debug, Clone)]
pub struct OperationFactory {
    editor: PageTextEditor,
    hooks: Arc<HookRegistry>,
}

impl OperationFactory {
    pub fn new(editor: PageTextEditor, hooks: Arc<HookRegistry>) -> Self {
        Self { editor, hooks }
    }

    pub fn editor(&self) -> &PageTextEditor {
        &self.editor
    }

    pub fn add(&self, category: CategoryRef) -> PendingOperation {
        let namespaces = self.editor.namespaces();
        let summary = format!("+[[{}]]", category.full_title(namespaces));
        let description = format!("Add category \"{}\"", category.name);
        let editor = self.editor.clone();
        let hooks = Arc::clone(&self.hooks);
        let name = category.name.clone();

        PendingOperation::new(OperationKind::Add, name, summary, description, move |text| {
            let text = hooks.run(HookKind::BeforeAdd, text.to_string(), &category.name, None)?;
            let text = editor.add(&text, &category, &[])?;
            hooks.run(HookKind::AfterAdd, text, &category.name, None)
        })
    }

    pub fn edit(&self, old_name: &str, new_category: CategoryRef) -> PendingOperation {
        let namespaces = self.editor.namespaces();
        let summary = format!(
            "[[{}:{}]] -> [[{}]]",
            namespaces.display_name(),
            old_name,
            new_category.full_title(namespaces)
        );
        let description = format!(
            "Change category \"{}\" to \"{}\"",
            old_name, new_category.name
        );
        let editor = self.editor.clone();
        let hooks = Arc::clone(&self.hooks);
        let old_name = old_name.to_string();

        PendingOperation::new(
            OperationKind::Edit,
            old_name.clone(),
            summary,
            description,
            move |text| {
                let new_name = Some(new_category.name.as_str());
                let text = hooks.run(HookKind::BeforeChange, text.to_string(), &old_name, new_name)?;
                let text = editor.edit(&text, &old_name, &new_category)?;
                hooks.run(HookKind::AfterChange, text, &old_name, new_name)
            },
        )
    }

    pub fn delete(&self, name: &str) -> PendingOperation {
        let namespaces = self.editor.namespaces();
        let summary = format!("-[[{}:{}]]", namespaces.display_name(), name);
        let description = format!("Remove category \"{name}\"");
        let editor = self.editor.clone();
        let hooks = Arc::clone(&self.hooks);
        let name = name.to_string();

        PendingOperation::new(
            OperationKind::Delete,
            name.clone(),
            summary,
            description,
            move |text| {
                let text = hooks.run(HookKind::BeforeDelete, text.to_string(), &name, None)?;
                let text = editor.delete(&text, &name)?;
                hooks.run(HookKind::AfterDelete, text, &name, None)
            },
        )
    }
}
