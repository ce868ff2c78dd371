//! Window event pumping with explicitly passed handlers.
//!
//! The frame loop owns its state and lends it to the window system for the
//! duration of one pump. Callbacks never reach state through a registered
//! pointer; they only see the `&mut dyn WindowEvents` passed to that pump.

use std::time::Duration;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

use framechain_core::{Error, Extent, Result, WindowConfig};

use crate::window::{Surface, Window};

/// How long [`WindowSystem::wait_events`] blocks before returning anyway.
const WAIT_EVENTS_TIMEOUT: Duration = Duration::from_millis(50);

/// Upper bound on pumps while waiting for the window to be created.
const OPEN_MAX_PUMPS: u32 = 200;

/// Receiver for window events, borrowed for the duration of one pump.
pub trait WindowEvents {
    /// The drawable area changed. May be zero while minimized.
    fn resized(&mut self, size: Extent);

    /// The user asked to close the window.
    fn close_requested(&mut self);
}

/// The slice of a window system the frame loop depends on.
pub trait WindowSystem {
    /// Dispatches pending events without blocking.
    fn pump_events(&mut self, handler: &mut dyn WindowEvents) -> Result<()>;

    /// Blocks until at least one event arrives (or a short timeout), then
    /// dispatches everything pending.
    fn wait_events(&mut self, handler: &mut dyn WindowEvents) -> Result<()>;

    /// Current drawable size in physical pixels.
    fn drawable_size(&self) -> Extent;
}

/// A handler that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreEvents;

impl WindowEvents for IgnoreEvents {
    fn resized(&mut self, _size: Extent) {}
    fn close_requested(&mut self) {}
}

/// State owned by the desktop window between pumps.
struct Shell {
    config: WindowConfig,
    window: Option<Window>,
    creation_error: Option<Error>,
    exited: bool,
}

/// Routes winit callbacks for one pump to the borrowed handler.
struct Dispatch<'a> {
    shell: &'a mut Shell,
    handler: &'a mut dyn WindowEvents,
}

impl ApplicationHandler for Dispatch<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.shell.window.is_some() || self.shell.creation_error.is_some() {
            return;
        }
        let config = &self.shell.config;
        match Window::new(event_loop, config.width, config.height, &config.title) {
            Ok(window) => {
                let size = window.size();
                self.shell.window = Some(window);
                self.handler.resized(size);
            }
            Err(e) => {
                tracing::error!("Failed to create window: {}", e);
                self.shell.creation_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested");
                self.handler.close_requested();
            }
            WindowEvent::Resized(size) => {
                let extent = Extent::new(size.width, size.height);
                if let Some(window) = self.shell.window.as_mut() {
                    window.resize(extent);
                }
                self.handler.resized(extent);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.handler.close_requested();
            }
            _ => {}
        }
    }
}

/// A winit window driven by `pump_app_events` instead of `run_app`.
pub struct DesktopWindow {
    // Dropped before the event loop.
    shell: Shell,
    event_loop: EventLoop<()>,
}

impl DesktopWindow {
    /// Creates the event loop and pumps it until the window exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the event loop cannot be created, window creation
    /// fails, or the window does not appear within a bounded number of pumps.
    pub fn open(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| Error::EventLoop(e.to_string()))?;

        let mut desktop = Self {
            shell: Shell {
                config: config.clone(),
                window: None,
                creation_error: None,
                exited: false,
            },
            event_loop,
        };

        for _ in 0..OPEN_MAX_PUMPS {
            desktop.pump(Some(Duration::from_millis(10)), &mut IgnoreEvents);
            if let Some(err) = desktop.shell.creation_error.take() {
                return Err(err);
            }
            if desktop.shell.window.is_some() {
                return Ok(desktop);
            }
            if desktop.shell.exited {
                break;
            }
        }

        Err(Error::Window("window was not created by the event loop".into()))
    }

    fn pump(&mut self, timeout: Option<Duration>, handler: &mut dyn WindowEvents) {
        let mut dispatch = Dispatch {
            shell: &mut self.shell,
            handler,
        };
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut dispatch) {
            tracing::debug!("Event loop exited with code {}", code);
            self.shell.exited = true;
        }
    }

    /// Returns the window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window has not been created.
    pub fn window(&self) -> Result<&Window> {
        self.shell
            .window
            .as_ref()
            .ok_or_else(|| Error::Window("window not created".into()))
    }

    /// Instance extensions needed to present to this window.
    pub fn required_extensions(&self) -> Result<Vec<*const std::ffi::c_char>> {
        use raw_window_handle::HasDisplayHandle;

        let display = self
            .event_loop
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        crate::window::get_required_extensions(display.as_raw())
    }

    /// Creates a Vulkan surface for the window.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        self.window()?.create_surface(entry, instance)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shell.exited {
            return Err(Error::EventLoop("event loop has exited".into()));
        }
        Ok(())
    }
}

impl WindowSystem for DesktopWindow {
    fn pump_events(&mut self, handler: &mut dyn WindowEvents) -> Result<()> {
        self.ensure_running()?;
        self.pump(Some(Duration::ZERO), handler);
        Ok(())
    }

    fn wait_events(&mut self, handler: &mut dyn WindowEvents) -> Result<()> {
        self.ensure_running()?;
        self.pump(Some(WAIT_EVENTS_TIMEOUT), handler);
        Ok(())
    }

    fn drawable_size(&self) -> Extent {
        self.shell
            .window
            .as_ref()
            .map(Window::size)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sizes: Vec<Extent>,
        closes: u32,
    }

    impl WindowEvents for Recorder {
        fn resized(&mut self, size: Extent) {
            self.sizes.push(size);
        }
        fn close_requested(&mut self) {
            self.closes += 1;
        }
    }

    #[test]
    fn test_handlers_are_object_safe() {
        let mut recorder = Recorder::default();
        {
            let handler: &mut dyn WindowEvents = &mut recorder;
            handler.resized(Extent::new(640, 480));
            handler.close_requested();
        }
        assert_eq!(recorder.sizes, vec![Extent::new(640, 480)]);
        assert_eq!(recorder.closes, 1);
    }

    #[test]
    fn test_ignore_events_accepts_everything() {
        let mut ignore = IgnoreEvents;
        ignore.resized(Extent::default());
        ignore.close_requested();
    }
}
