use crate::bridge::PresentationEventBridge;
use crate::clock::{Clock, SystemClock};
use crate::companion::{CompanionProcessGuard, ProcessProbe, SystemProcessProbe};
use crate::dispatch::{UiDispatcher, UiThreadDispatcher};
use crate::events::EventBus;
use crate::foreign::fake::{fake_probe, FakePresentationApp};
use crate::foreign::HandleProbe;
use crate::ink::{FsInkPersistence, InkBufferStore, InkPersistence, SaveOutcome, StrokeSet};
use crate::navigation::NavigationFacade;
use crate::schedule::PeriodicTask;
use crate::settings::Settings;
use crate::supervisor::ConnectionSupervisor;
use anyhow::Result;
use std::sync::{Arc, Mutex, PoisonError};

/// Collaborators the runtime is assembled from.
pub struct RuntimeParts {
    pub probe: Arc<dyn HandleProbe>,
    pub process_probe: Arc<dyn ProcessProbe>,
    pub persistence: Option<Arc<dyn InkPersistence>>,
    pub dispatcher: Arc<dyn UiDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// Everything wired together from one `Settings`.
pub struct SlideInkRuntime {
    settings: Settings,
    bus: Arc<EventBus>,
    ink: Arc<InkBufferStore>,
    persistence: Option<Arc<dyn InkPersistence>>,
    supervisor: Arc<ConnectionSupervisor>,
    navigation: NavigationFacade,
    companion: Option<Arc<CompanionProcessGuard>>,
    memory_task: Mutex<Option<PeriodicTask>>,
}

impl SlideInkRuntime {
    pub fn new(settings: Settings, parts: RuntimeParts) -> Self {
        let supervisor_timings = settings.supervisor.timings();
        let bus = Arc::new(EventBus::new(
            parts.dispatcher,
            supervisor_timings.ui_dispatch_timeout,
        ));
        let ink = Arc::new(InkBufferStore::new(
            settings.ink.timings(),
            Arc::clone(&parts.clock),
        ));
        let bridge = PresentationEventBridge::new(
            Arc::clone(&ink),
            parts.persistence.clone(),
            settings.auto_save_enabled,
            Arc::clone(&parts.clock),
        );
        let supervisor = Arc::new(ConnectionSupervisor::new(
            parts.probe,
            bridge,
            Arc::clone(&bus),
            Arc::clone(&parts.clock),
            supervisor_timings,
        ));
        let companion = settings.companion_process_support.then(|| {
            let guard = Arc::new(CompanionProcessGuard::new(
                parts.process_probe,
                settings.companion.timings(),
                Arc::clone(&parts.clock),
            ));
            guard.set_releaser(supervisor.releaser());
            supervisor.attach_companion_guard(Arc::clone(&guard));
            guard
        });
        let navigation = NavigationFacade::new(Arc::clone(&supervisor));
        Self {
            settings,
            bus,
            ink,
            persistence: parts.persistence,
            supervisor,
            navigation,
            companion,
            memory_task: Mutex::new(None),
        }
    }

    /// Attach to the real presentation application through COM automation.
    #[cfg(target_os = "windows")]
    pub fn native(settings: Settings) -> Result<Self> {
        use crate::foreign::com::ComDirectory;
        use crate::foreign::RunningObjectProbe;

        let parts = Self::system_parts(
            &settings,
            Arc::new(RunningObjectProbe::new(ComDirectory::default())),
        )?;
        Ok(Self::new(settings, parts))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn native(_settings: Settings) -> Result<Self> {
        anyhow::bail!("presentation automation is only available on Windows")
    }

    /// Drive the runtime with a scripted application instead of a real one.
    pub fn simulated(settings: Settings, app: &FakePresentationApp) -> Result<Self> {
        let parts = Self::system_parts(&settings, Arc::new(fake_probe(app)))?;
        Ok(Self::new(settings, parts))
    }

    fn system_parts(settings: &Settings, probe: Arc<dyn HandleProbe>) -> Result<RuntimeParts> {
        Ok(RuntimeParts {
            probe,
            process_probe: Arc::new(SystemProcessProbe::new(
                &settings.companion.family_process_names,
            )),
            persistence: Some(Arc::new(FsInkPersistence::new(
                settings.resolve_ink_data_dir(),
            ))),
            dispatcher: Arc::new(UiThreadDispatcher::spawn("slide-ink-ui")?),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn ink(&self) -> &Arc<InkBufferStore> {
        &self.ink
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn navigation(&self) -> &NavigationFacade {
        &self.navigation
    }

    pub fn companion(&self) -> Option<&Arc<CompanionProcessGuard>> {
        self.companion.as_ref()
    }

    pub fn start(&self) -> Result<()> {
        self.supervisor.start_monitoring()?;
        if let Some(guard) = &self.companion {
            guard.start()?;
        }
        let mut memory_task = self.memory_task.lock().unwrap_or_else(PoisonError::into_inner);
        if memory_task.is_none() {
            let ink = Arc::downgrade(&self.ink);
            *memory_task = Some(PeriodicTask::spawn(
                "slide-ink-memory",
                self.ink.timings().cleanup_interval,
                move || {
                    if let Some(ink) = ink.upgrade() {
                        ink.cleanup_memory();
                    }
                },
            )?);
        }
        tracing::info!(
            auto_save = self.settings.auto_save_enabled,
            companion = self.companion.is_some(),
            "slide ink runtime started"
        );
        Ok(())
    }

    /// Stop every periodic task and disconnect. Idempotent.
    pub fn stop(&self) {
        let memory_task = self
            .memory_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(memory_task);
        if let Some(guard) = &self.companion {
            guard.stop();
        }
        self.supervisor.stop_monitoring();
    }

    /// Store the canvas's last strokes regardless of the slide lock and
    /// persist the session. For the final save before teardown.
    pub fn final_save(&self, slide: u32, strokes: &StrokeSet) -> SaveOutcome {
        let outcome = self.ink.force_save(slide, strokes);
        if let (Some(session), Some(persistence)) = (self.supervisor.session(), &self.persistence) {
            if self.settings.auto_save_enabled {
                self.ink.flush(session.fingerprint(), persistence.as_ref());
            }
        }
        outcome
    }
}

impl Drop for SlideInkRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
