//! Per-file diagnostic overlays ("phantoms") built from console output.
//!
//! The tracker accumulates every diagnostic seen since the last [`reset`]
//! and, whenever a file gains one, re-renders that file's whole overlay set
//! from the accumulated list. Overlay positions move as the user edits, so
//! rendering is always a full recompute rather than a patch.
//!
//! [`reset`]: ErrorAnnotationTracker::reset

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::diagnostics::{CompilerDiagnosticClassifier, Diagnostic, LineClassifier};

/// Editor side of the overlays: open-file lookup, rendering, navigation.
pub trait AnnotationView: Send + Sync {
    fn is_open(&self, file: &str) -> bool;
    /// Replace every overlay of `file` with `annotations`.
    fn show(&self, file: &str, annotations: &[Diagnostic]);
    fn scroll_to(&self, file: &str, line: usize, column: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking,
}

#[derive(Default)]
struct TrackerInner {
    by_file: BTreeMap<String, Vec<Diagnostic>>,
    first_scroll_done: bool,
}

pub struct ErrorAnnotationTracker {
    classifier: Box<dyn LineClassifier>,
    view: Option<Arc<dyn AnnotationView>>,
    inner: Mutex<TrackerInner>,
}

impl ErrorAnnotationTracker {
    pub fn new(view: Option<Arc<dyn AnnotationView>>) -> Self {
        Self::with_classifier(Box::new(CompilerDiagnosticClassifier), view)
    }

    pub fn with_classifier(
        classifier: Box<dyn LineClassifier>,
        view: Option<Arc<dyn AnnotationView>>,
    ) -> Self {
        Self {
            classifier,
            view,
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.inner.lock().by_file.is_empty() {
            TrackerState::Idle
        } else {
            TrackerState::Tracking
        }
    }

    /// Whether `text` is worth scanning at all.
    pub fn has_signature(&self, text: &str) -> bool {
        self.classifier.has_signature(text)
    }

    /// Drop every tracked diagnostic and clear the overlays of their files.
    /// Called before each new build or monitor session.
    pub fn reset(&self) {
        let cleared: Vec<String> = {
            let mut inner = self.inner.lock();
            inner.first_scroll_done = false;
            std::mem::take(&mut inner.by_file).into_keys().collect()
        };
        if let Some(view) = &self.view {
            for file in cleared.iter().filter(|f| view.is_open(f)) {
                view.show(file, &[]);
            }
        }
    }

    /// Scan every line of a (possibly multi-line) message.
    pub fn scan_text(&self, text: &str) -> Vec<Diagnostic> {
        text.lines().filter_map(|line| self.scan_line(line)).collect()
    }

    /// Record the diagnostic on `line`, if any, and refresh its file.
    pub fn scan_line(&self, line: &str) -> Option<Diagnostic> {
        let diagnostic = self.classifier.classify(line)?;

        let scroll = {
            let mut inner = self.inner.lock();
            inner
                .by_file
                .entry(diagnostic.file.clone())
                .or_default()
                .push(diagnostic.clone());
            !std::mem::replace(&mut inner.first_scroll_done, true)
        };

        tracing::debug!(file = %diagnostic.file, line = diagnostic.line, kind = ?diagnostic.kind, "diagnostic tracked");
        self.render(&diagnostic.file);

        if scroll && let Some(view) = &self.view {
            view.scroll_to(&diagnostic.file, diagnostic.line, diagnostic.column);
        }
        Some(diagnostic)
    }

    /// Recompute every overlay of `file` if it is open in the editor.
    pub fn render(&self, file: &str) {
        let Some(view) = &self.view else {
            return;
        };
        if !view.is_open(file) {
            return;
        }
        let annotations = self.annotations_for(file);
        view.show(file, &annotations);
    }

    /// Re-render every tracked file. Used when a file is (re)opened.
    pub fn render_all(&self) {
        for file in self.files() {
            self.render(&file);
        }
    }

    pub fn annotations_for(&self, file: &str) -> Vec<Diagnostic> {
        self.inner.lock().by_file.get(file).cloned().unwrap_or_default()
    }

    pub fn files(&self) -> Vec<String> {
        self.inner.lock().by_file.keys().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use std::collections::HashSet;

    /// In-memory editor that records overlays and scroll requests.
    #[derive(Default)]
    pub(crate) struct RecordingView {
        pub(crate) open: Mutex<HashSet<String>>,
        pub(crate) shown: Mutex<BTreeMap<String, Vec<Diagnostic>>>,
        pub(crate) show_calls: Mutex<usize>,
        pub(crate) scrolls: Mutex<Vec<(String, usize, usize)>>,
    }

    impl RecordingView {
        pub(crate) fn with_open(files: &[&str]) -> Arc<Self> {
            let view = Self::default();
            view.open.lock().extend(files.iter().map(|f| f.to_string()));
            Arc::new(view)
        }
    }

    impl AnnotationView for RecordingView {
        fn is_open(&self, file: &str) -> bool {
            self.open.lock().contains(file)
        }

        fn show(&self, file: &str, annotations: &[Diagnostic]) {
            *self.show_calls.lock() += 1;
            self.shown.lock().insert(file.to_string(), annotations.to_vec());
        }

        fn scroll_to(&self, file: &str, line: usize, column: usize) {
            self.scrolls.lock().push((file.to_string(), line, column));
        }
    }

    #[test]
    fn first_match_moves_tracker_to_tracking() {
        let tracker = ErrorAnnotationTracker::new(None);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.scan_line("Compiling src/main.cpp").is_none());
        assert_eq!(tracker.state(), TrackerState::Idle);

        tracker.scan_line("src/main.cpp:3:1: error: expected ';'");
        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert_eq!(tracker.files(), vec!["src/main.cpp".to_string()]);
    }

    #[test]
    fn groups_by_file_in_order() {
        let tracker = ErrorAnnotationTracker::new(None);
        tracker.scan_text(
            "a.cpp:1:1: error: one\nb.cpp:2:2: warning: two\na.cpp:5:3: warning: three\n",
        );
        let a = tracker.annotations_for("a.cpp");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].text, "one");
        assert_eq!(a[1].kind, DiagnosticKind::Warning);
        assert_eq!(a[1].line, 4);
        assert_eq!(tracker.annotations_for("b.cpp").len(), 1);
    }

    #[test]
    fn render_recomputes_full_set_for_open_files_only() {
        let view = RecordingView::with_open(&["a.cpp"]);
        let tracker = ErrorAnnotationTracker::new(Some(view.clone()));
        tracker.scan_line("a.cpp:1:1: error: one");
        tracker.scan_line("a.cpp:2:1: error: two");
        tracker.scan_line("closed.cpp:2:1: error: hidden");

        let shown = view.shown.lock();
        assert_eq!(shown["a.cpp"].len(), 2);
        assert!(!shown.contains_key("closed.cpp"));
    }

    #[test]
    fn only_first_annotation_of_session_scrolls() {
        let view = RecordingView::with_open(&["a.cpp"]);
        let tracker = ErrorAnnotationTracker::new(Some(view.clone()));
        tracker.scan_line("a.cpp:10:4: error: one");
        tracker.scan_line("a.cpp:20:1: error: two");
        assert_eq!(*view.scrolls.lock(), vec![("a.cpp".to_string(), 9, 4)]);

        tracker.reset();
        tracker.scan_line("a.cpp:30:2: warning: three");
        assert_eq!(view.scrolls.lock().len(), 2);
        assert_eq!(view.scrolls.lock()[1], ("a.cpp".to_string(), 29, 2));
    }

    #[test]
    fn reset_clears_state_and_overlays() {
        let view = RecordingView::with_open(&["a.cpp"]);
        let tracker = ErrorAnnotationTracker::new(Some(view.clone()));
        tracker.scan_line("a.cpp:1:1: error: one");
        tracker.reset();

        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.annotations_for("a.cpp").is_empty());
        assert!(view.shown.lock()["a.cpp"].is_empty());
    }

    #[test]
    fn render_all_redraws_reopened_file() {
        let view = RecordingView::with_open(&[]);
        let tracker = ErrorAnnotationTracker::new(Some(view.clone()));
        tracker.scan_line("late.cpp:1:1: error: one");
        assert_eq!(*view.show_calls.lock(), 0);

        view.open.lock().insert("late.cpp".to_string());
        tracker.render_all();
        assert_eq!(view.shown.lock()["late.cpp"].len(), 1);
    }
}
