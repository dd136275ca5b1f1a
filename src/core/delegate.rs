//! # Delegate Hooks
//!
//! Optional callbacks consulted whenever a [`crate::ScriptInstance`] is about to mutate
//! or hand out data. Hooks come in pairs:
//!
//! - `should_*` hooks inspect the data and may veto the operation by returning `false`.
//!   A veto is not an error; the mutation is simply skipped.
//! - `will_*` hooks receive the data and return the value actually used for the rest of
//!   the operation.
//!
//! Every hook is optional. A missing `should_*` hook allows the operation, a missing
//! `will_*` hook passes the data through unchanged.

use crate::models::{HistoryEntry, LaunchOptions};
use std::fmt;

pub type Veto<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
pub type Transform<T> = Box<dyn Fn(T) -> T + Send + Sync>;

#[derive(Default)]
pub struct DelegateHooks {
    should_add_item_to_history: Option<Veto<HistoryEntry>>,
    will_add_item_to_history: Option<Transform<HistoryEntry>>,
    should_return_item_from_history: Option<Veto<HistoryEntry>>,
    will_return_item_from_history: Option<Transform<HistoryEntry>>,
    should_set_result: Option<Veto<[u8]>>,
    will_set_result: Option<Transform<Vec<u8>>>,
    should_append_partial_result: Option<Veto<[u8]>>,
    will_append_partial_result: Option<Transform<Vec<u8>>>,
    should_set_script: Option<Veto<str>>,
    will_set_script: Option<Transform<String>>,
    should_set_options: Option<Veto<LaunchOptions>>,
    will_set_options: Option<Transform<LaunchOptions>>,
}

impl DelegateHooks {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Registration ---

    pub fn on_should_add_item_to_history(
        mut self,
        hook: impl Fn(&HistoryEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_add_item_to_history = Some(Box::new(hook));
        self
    }

    pub fn on_will_add_item_to_history(
        mut self,
        hook: impl Fn(HistoryEntry) -> HistoryEntry + Send + Sync + 'static,
    ) -> Self {
        self.will_add_item_to_history = Some(Box::new(hook));
        self
    }

    pub fn on_should_return_item_from_history(
        mut self,
        hook: impl Fn(&HistoryEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_return_item_from_history = Some(Box::new(hook));
        self
    }

    pub fn on_will_return_item_from_history(
        mut self,
        hook: impl Fn(HistoryEntry) -> HistoryEntry + Send + Sync + 'static,
    ) -> Self {
        self.will_return_item_from_history = Some(Box::new(hook));
        self
    }

    pub fn on_should_set_result(
        mut self,
        hook: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_set_result = Some(Box::new(hook));
        self
    }

    pub fn on_will_set_result(
        mut self,
        hook: impl Fn(Vec<u8>) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.will_set_result = Some(Box::new(hook));
        self
    }

    pub fn on_should_append_partial_result(
        mut self,
        hook: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_append_partial_result = Some(Box::new(hook));
        self
    }

    pub fn on_will_append_partial_result(
        mut self,
        hook: impl Fn(Vec<u8>) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.will_append_partial_result = Some(Box::new(hook));
        self
    }

    pub fn on_should_set_script(
        mut self,
        hook: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_set_script = Some(Box::new(hook));
        self
    }

    pub fn on_will_set_script(
        mut self,
        hook: impl Fn(String) -> String + Send + Sync + 'static,
    ) -> Self {
        self.will_set_script = Some(Box::new(hook));
        self
    }

    pub fn on_should_set_options(
        mut self,
        hook: impl Fn(&LaunchOptions) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_set_options = Some(Box::new(hook));
        self
    }

    pub fn on_will_set_options(
        mut self,
        hook: impl Fn(LaunchOptions) -> LaunchOptions + Send + Sync + 'static,
    ) -> Self {
        self.will_set_options = Some(Box::new(hook));
        self
    }

    // --- Consultation ---

    pub fn should_add_item_to_history(&self, entry: &HistoryEntry) -> bool {
        self.should_add_item_to_history
            .as_ref()
            .is_none_or(|hook| hook(entry))
    }

    pub fn will_add_item_to_history(&self, entry: HistoryEntry) -> HistoryEntry {
        apply(&self.will_add_item_to_history, entry)
    }

    pub fn should_return_item_from_history(&self, entry: &HistoryEntry) -> bool {
        self.should_return_item_from_history
            .as_ref()
            .is_none_or(|hook| hook(entry))
    }

    pub fn will_return_item_from_history(&self, entry: HistoryEntry) -> HistoryEntry {
        apply(&self.will_return_item_from_history, entry)
    }

    pub fn should_set_result(&self, data: &[u8]) -> bool {
        self.should_set_result.as_ref().is_none_or(|hook| hook(data))
    }

    pub fn will_set_result(&self, data: Vec<u8>) -> Vec<u8> {
        apply(&self.will_set_result, data)
    }

    pub fn should_append_partial_result(&self, data: &[u8]) -> bool {
        self.should_append_partial_result
            .as_ref()
            .is_none_or(|hook| hook(data))
    }

    pub fn will_append_partial_result(&self, data: Vec<u8>) -> Vec<u8> {
        apply(&self.will_append_partial_result, data)
    }

    pub fn should_set_script(&self, script: &str) -> bool {
        self.should_set_script.as_ref().is_none_or(|hook| hook(script))
    }

    pub fn will_set_script(&self, script: String) -> String {
        apply(&self.will_set_script, script)
    }

    pub fn should_set_options(&self, options: &LaunchOptions) -> bool {
        self.should_set_options
            .as_ref()
            .is_none_or(|hook| hook(options))
    }

    pub fn will_set_options(&self, options: LaunchOptions) -> LaunchOptions {
        apply(&self.will_set_options, options)
    }

    // --- Combined check-and-transform ---

    /// Runs a should/will pair: `None` when vetoed, the transformed value otherwise.
    pub fn admit_history_item(&self, entry: HistoryEntry) -> Option<HistoryEntry> {
        self.should_add_item_to_history(&entry)
            .then(|| self.will_add_item_to_history(entry))
    }

    pub fn release_history_item(&self, entry: HistoryEntry) -> Option<HistoryEntry> {
        self.should_return_item_from_history(&entry)
            .then(|| self.will_return_item_from_history(entry))
    }

    pub fn admit_result(&self, data: Vec<u8>) -> Option<Vec<u8>> {
        self.should_set_result(&data)
            .then(|| self.will_set_result(data))
    }

    pub fn admit_partial_result(&self, data: Vec<u8>) -> Option<Vec<u8>> {
        self.should_append_partial_result(&data)
            .then(|| self.will_append_partial_result(data))
    }

    pub fn admit_script(&self, script: String) -> Option<String> {
        self.should_set_script(&script)
            .then(|| self.will_set_script(script))
    }

    pub fn admit_options(&self, options: LaunchOptions) -> Option<LaunchOptions> {
        self.should_set_options(&options)
            .then(|| self.will_set_options(options))
    }

    fn installed(&self) -> Vec<&'static str> {
        let slots = [
            ("should_add_item_to_history", self.should_add_item_to_history.is_some()),
            ("will_add_item_to_history", self.will_add_item_to_history.is_some()),
            ("should_return_item_from_history", self.should_return_item_from_history.is_some()),
            ("will_return_item_from_history", self.will_return_item_from_history.is_some()),
            ("should_set_result", self.should_set_result.is_some()),
            ("will_set_result", self.will_set_result.is_some()),
            ("should_append_partial_result", self.should_append_partial_result.is_some()),
            ("will_append_partial_result", self.will_append_partial_result.is_some()),
            ("should_set_script", self.should_set_script.is_some()),
            ("will_set_script", self.will_set_script.is_some()),
            ("should_set_options", self.should_set_options.is_some()),
            ("will_set_options", self.will_set_options.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }
}

fn apply<T>(hook: &Option<Transform<T>>, value: T) -> T {
    match hook {
        Some(hook) => hook(value),
        None => value,
    }
}

impl fmt::Debug for DelegateHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateHooks")
            .field("installed", &self.installed())
            .finish()
    }
}
