//! Named output consoles backed by editor text surfaces.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Console name whose output always scrolls, whatever the user preference.
pub const EXEC_CONSOLE: &str = "exec";

/// Prefix of per-port monitor consoles: `serial:<port>`.
pub const SERIAL_CONSOLE_PREFIX: &str = "serial:";

/// Default line count above which a console is wiped before the next append.
pub const DEFAULT_AUTO_CLEAN_THRESHOLD: usize = 30_000;

/// An editor panel the console writes into.
pub trait TextSurface: Send + Sync {
    fn append(&self, text: &str);
    fn set_read_only(&self, read_only: bool);
    fn is_read_only(&self) -> bool;
    fn scroll_to_end(&self);
    fn erase_all(&self);
    fn set_syntax(&self, syntax: &str);
    fn set_scratch(&self, scratch: bool);
    fn line_count(&self) -> usize;
}

/// The editor window that owns text surfaces.
pub trait SurfaceHost: Send + Sync {
    /// Look up an open surface by name. `None` once the user closed it.
    fn find(&self, name: &str) -> Option<Arc<dyn TextSurface>>;
    fn create(&self, name: &str) -> Arc<dyn TextSurface>;
}

/// Console behaviour shared by every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    pub auto_scroll: bool,
    pub auto_clean: bool,
    pub auto_clean_threshold: usize,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            auto_scroll: true,
            auto_clean: true,
            auto_clean_threshold: DEFAULT_AUTO_CLEAN_THRESHOLD,
        }
    }
}

/// One named output destination.
#[derive(Clone)]
pub struct ConsoleHandle {
    name: String,
    surface: Arc<dyn TextSurface>,
    read_only: bool,
    auto_scroll: bool,
    auto_clean_threshold: Option<usize>,
}

impl ConsoleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn surface(&self) -> &Arc<dyn TextSurface> {
        &self.surface
    }

    fn force_scroll(&self) -> bool {
        self.name == EXEC_CONSOLE
    }
}

/// Syntax hint given to a newly created surface.
pub fn syntax_for(name: &str) -> &'static str {
    if name.starts_with(SERIAL_CONSOLE_PREFIX) {
        "serial-monitor"
    } else if name == EXEC_CONSOLE || name == "build" {
        "build-output"
    } else {
        "plain-text"
    }
}

/// Routes text to per-name consoles, creating surfaces on first use.
pub struct ConsoleSink {
    host: Arc<dyn SurfaceHost>,
    settings: Mutex<ConsoleSettings>,
    handles: Mutex<HashMap<String, ConsoleHandle>>,
}

impl ConsoleSink {
    pub fn new(host: Arc<dyn SurfaceHost>, settings: ConsoleSettings) -> Self {
        Self {
            host,
            settings: Mutex::new(settings),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> ConsoleSettings {
        *self.settings.lock()
    }

    /// Update preferences. Existing handles pick them up on next resolve.
    pub fn set_settings(&self, settings: ConsoleSettings) {
        *self.settings.lock() = settings;
        let mut handles = self.handles.lock();
        for handle in handles.values_mut() {
            handle.auto_scroll = settings.auto_scroll;
            handle.auto_clean_threshold = settings.auto_clean.then_some(settings.auto_clean_threshold);
        }
    }

    /// Return the console called `name`, creating its surface if the editor
    /// has none. A cached handle whose surface was closed is replaced.
    pub fn resolve_or_create(&self, name: &str) -> ConsoleHandle {
        let mut handles = self.handles.lock();
        self.resolve_locked(&mut handles, name).clone()
    }

    fn resolve_locked<'a>(
        &self,
        handles: &'a mut HashMap<String, ConsoleHandle>,
        name: &str,
    ) -> &'a mut ConsoleHandle {
        let settings = *self.settings.lock();
        let surface = match self.host.find(name) {
            Some(surface) => surface,
            None => {
                if handles.remove(name).is_some() {
                    tracing::debug!(console = name, "console surface was closed, recreating");
                }
                let surface = self.host.create(name);
                surface.set_syntax(syntax_for(name));
                surface.set_scratch(true);
                surface.set_read_only(true);
                surface
            }
        };
        let handle = handles.entry(name.to_string()).or_insert_with(|| ConsoleHandle {
            name: name.to_string(),
            surface: surface.clone(),
            read_only: surface.is_read_only(),
            auto_scroll: settings.auto_scroll,
            auto_clean_threshold: settings.auto_clean.then_some(settings.auto_clean_threshold),
        });
        handle.surface = surface;
        handle
    }

    /// Append to the console called `name`.
    pub fn write(&self, name: &str, text: &str) {
        let mut handles = self.handles.lock();
        let handle = self.resolve_locked(&mut handles, name);
        Self::append(handle, text);
    }

    /// Guarded append: the surface is only writable while the text goes in.
    /// An oversized console is wiped first, never after the append.
    pub fn append(handle: &mut ConsoleHandle, text: &str) {
        let surface = handle.surface.clone();
        if let Some(threshold) = handle.auto_clean_threshold
            && surface.line_count() > threshold
        {
            tracing::info!(console = %handle.name, threshold, "auto-cleaning console");
            surface.set_read_only(false);
            surface.erase_all();
        }

        surface.set_read_only(false);
        surface.append(text);
        surface.set_read_only(true);
        handle.read_only = true;

        if handle.auto_scroll || handle.force_scroll() {
            surface.scroll_to_end();
        }
    }

    pub fn clear(&self, name: &str) {
        let mut handles = self.handles.lock();
        let handle = self.resolve_locked(&mut handles, name);
        let surface = handle.surface.clone();
        surface.set_read_only(false);
        surface.erase_all();
        surface.set_read_only(true);
        handle.read_only = true;
    }

    /// Close a console: its handle is dropped and the next write recreates
    /// it. The surface itself is left to the editor.
    pub fn close(&self, name: &str) -> bool {
        self.handles.lock().remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.handles.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Surface event log, used to check write ordering.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SurfaceEvent {
        ReadOnly(bool),
        Append(String),
        Erase,
        Scroll,
    }

    #[derive(Default)]
    pub(crate) struct MemorySurface {
        pub(crate) text: Mutex<String>,
        pub(crate) read_only: Mutex<bool>,
        pub(crate) syntax: Mutex<Option<String>>,
        pub(crate) scratch: Mutex<bool>,
        pub(crate) events: Mutex<Vec<SurfaceEvent>>,
    }

    impl MemorySurface {
        pub(crate) fn contents(&self) -> String {
            self.text.lock().clone()
        }
    }

    impl TextSurface for MemorySurface {
        fn append(&self, text: &str) {
            self.text.lock().push_str(text);
            self.events.lock().push(SurfaceEvent::Append(text.to_string()));
        }
        fn set_read_only(&self, read_only: bool) {
            *self.read_only.lock() = read_only;
            self.events.lock().push(SurfaceEvent::ReadOnly(read_only));
        }
        fn is_read_only(&self) -> bool {
            *self.read_only.lock()
        }
        fn scroll_to_end(&self) {
            self.events.lock().push(SurfaceEvent::Scroll);
        }
        fn erase_all(&self) {
            self.text.lock().clear();
            self.events.lock().push(SurfaceEvent::Erase);
        }
        fn set_syntax(&self, syntax: &str) {
            *self.syntax.lock() = Some(syntax.to_string());
        }
        fn set_scratch(&self, scratch: bool) {
            *self.scratch.lock() = scratch;
        }
        fn line_count(&self) -> usize {
            self.text.lock().lines().count()
        }
    }

    /// Editor window holding [`MemorySurface`]s by name.
    #[derive(Default)]
    pub(crate) struct MemoryHost {
        pub(crate) surfaces: Mutex<HashMap<String, Arc<MemorySurface>>>,
        pub(crate) created: Mutex<usize>,
    }

    impl MemoryHost {
        pub(crate) fn surface(&self, name: &str) -> Option<Arc<MemorySurface>> {
            self.surfaces.lock().get(name).cloned()
        }

        pub(crate) fn close(&self, name: &str) {
            self.surfaces.lock().remove(name);
        }
    }

    impl SurfaceHost for MemoryHost {
        fn find(&self, name: &str) -> Option<Arc<dyn TextSurface>> {
            self.surface(name).map(|s| s as Arc<dyn TextSurface>)
        }

        fn create(&self, name: &str) -> Arc<dyn TextSurface> {
            *self.created.lock() += 1;
            let surface = Arc::new(MemorySurface::default());
            self.surfaces.lock().insert(name.to_string(), surface.clone());
            surface
        }
    }

    fn sink_with(settings: ConsoleSettings) -> (Arc<MemoryHost>, ConsoleSink) {
        let host = Arc::new(MemoryHost::default());
        let sink = ConsoleSink::new(host.clone(), settings);
        (host, sink)
    }

    #[test]
    fn creates_surface_lazily_with_syntax_hint() {
        let (host, sink) = sink_with(ConsoleSettings::default());
        assert!(host.surface("serial:/dev/ttyUSB0").is_none());

        sink.write("serial:/dev/ttyUSB0", "hello\n");
        let surface = host.surface("serial:/dev/ttyUSB0").unwrap();
        assert_eq!(surface.contents(), "hello\n");
        assert_eq!(surface.syntax.lock().as_deref(), Some("serial-monitor"));
        assert!(*surface.scratch.lock());

        sink.write("serial:/dev/ttyUSB0", "again\n");
        assert_eq!(*host.created.lock(), 1);
    }

    #[test]
    fn append_is_guarded_by_read_only_toggle() {
        let (host, sink) = sink_with(ConsoleSettings::default());
        sink.write("build", "line\n");
        let surface = host.surface("build").unwrap();
        let events = surface.events.lock().clone();
        let tail = &events[events.len() - 4..];
        assert_eq!(
            tail,
            &[
                SurfaceEvent::ReadOnly(false),
                SurfaceEvent::Append("line\n".into()),
                SurfaceEvent::ReadOnly(true),
                SurfaceEvent::Scroll,
            ]
        );
        assert!(sink.resolve_or_create("build").read_only());
    }

    #[test]
    fn auto_clean_happens_before_append() {
        let settings = ConsoleSettings {
            auto_clean_threshold: 3,
            ..ConsoleSettings::default()
        };
        let (host, sink) = sink_with(settings);
        sink.write("build", "1\n2\n3\n");
        sink.write("build", "4\n");
        let surface = host.surface("build").unwrap();
        assert_eq!(surface.contents(), "1\n2\n3\n4\n");

        sink.write("build", "5\n");
        assert_eq!(surface.contents(), "5\n");
        let events = surface.events.lock();
        let erase = events.iter().rposition(|e| *e == SurfaceEvent::Erase).unwrap();
        let append = events
            .iter()
            .rposition(|e| *e == SurfaceEvent::Append("5\n".into()))
            .unwrap();
        assert!(erase < append);
    }

    #[test]
    fn auto_clean_can_be_disabled() {
        let settings = ConsoleSettings {
            auto_clean: false,
            auto_clean_threshold: 1,
            ..ConsoleSettings::default()
        };
        let (host, sink) = sink_with(settings);
        for i in 0..5 {
            sink.write("build", &format!("{i}\n"));
        }
        assert_eq!(host.surface("build").unwrap().line_count(), 5);
    }

    #[test]
    fn exec_console_scrolls_even_when_auto_scroll_is_off() {
        let settings = ConsoleSettings {
            auto_scroll: false,
            ..ConsoleSettings::default()
        };
        let (host, sink) = sink_with(settings);
        sink.write("build", "a\n");
        sink.write(EXEC_CONSOLE, "b\n");

        let scrolled = |name: &str| {
            host.surface(name)
                .unwrap()
                .events
                .lock()
                .contains(&SurfaceEvent::Scroll)
        };
        assert!(!scrolled("build"));
        assert!(scrolled(EXEC_CONSOLE));
    }

    #[test]
    fn closed_surface_is_recreated() {
        let (host, sink) = sink_with(ConsoleSettings::default());
        sink.write("build", "old\n");
        host.close("build");
        sink.write("build", "new\n");
        assert_eq!(*host.created.lock(), 2);
        assert_eq!(host.surface("build").unwrap().contents(), "new\n");
    }

    #[test]
    fn close_drops_the_handle_but_keeps_the_surface() {
        let (host, sink) = sink_with(ConsoleSettings::default());
        sink.write("build", "kept\n");
        assert!(sink.close("build"));
        assert!(!sink.close("build"));
        assert!(sink.names().is_empty());

        sink.write("build", "more\n");
        assert_eq!(*host.created.lock(), 1);
        assert_eq!(host.surface("build").unwrap().contents(), "kept\nmore\n");
    }

    #[test]
    fn settings_update_reaches_existing_handles() {
        let (host, sink) = sink_with(ConsoleSettings::default());
        sink.write("build", "a\n");
        sink.set_settings(ConsoleSettings {
            auto_scroll: false,
            ..ConsoleSettings::default()
        });
        host.surface("build").unwrap().events.lock().clear();
        sink.write("build", "b\n");
        assert!(
            !host
                .surface("build")
                .unwrap()
                .events
                .lock()
                .contains(&SurfaceEvent::Scroll)
        );
    }

    #[test]
    fn syntax_hints() {
        assert_eq!(syntax_for("serial:COM3"), "serial-monitor");
        assert_eq!(syntax_for(EXEC_CONSOLE), "build-output");
        assert_eq!(syntax_for("notes"), "plain-text");
    }
}
