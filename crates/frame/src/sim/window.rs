use std::collections::BTreeMap;

use framechain_core::{Error, Extent, Result};
use framechain_platform::{WindowEvents, WindowSystem};

/// A scripted window event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowScript {
    /// The drawable area changes; zero models a minimized window.
    Resize(Extent),
    Close,
}

/// A window whose events are scripted by pump number.
///
/// Both [`WindowSystem::pump_events`] and [`WindowSystem::wait_events`] count
/// as one pump and deliver whatever is scheduled for it.
#[derive(Debug)]
pub struct SimWindow {
    size: Extent,
    script: BTreeMap<u64, Vec<WindowScript>>,
    pumps: u64,
    waits: u64,
}

impl SimWindow {
    pub fn new(size: Extent) -> Self {
        Self {
            size,
            script: BTreeMap::new(),
            pumps: 0,
            waits: 0,
        }
    }

    /// Schedules `event` for pump number `pump` (1-based).
    pub fn at(mut self, pump: u64, event: WindowScript) -> Self {
        self.script.entry(pump).or_default().push(event);
        self
    }

    #[inline]
    pub fn pumps(&self) -> u64 {
        self.pumps
    }

    /// Number of blocking waits.
    #[inline]
    pub fn waits(&self) -> u64 {
        self.waits
    }

    fn dispatch(&mut self, handler: &mut dyn WindowEvents) {
        self.pumps += 1;
        for event in self.script.remove(&self.pumps).unwrap_or_default() {
            match event {
                WindowScript::Resize(size) => {
                    self.size = size;
                    handler.resized(size);
                }
                WindowScript::Close => handler.close_requested(),
            }
        }
    }
}

impl WindowSystem for SimWindow {
    fn pump_events(&mut self, handler: &mut dyn WindowEvents) -> Result<()> {
        self.dispatch(handler);
        Ok(())
    }

    fn wait_events(&mut self, handler: &mut dyn WindowEvents) -> Result<()> {
        if self.script.is_empty() {
            // Nothing will ever arrive; blocking would never return.
            return Err(Error::Window(
                "simulated window has no scripted events left to wait for".into(),
            ));
        }
        self.waits += 1;
        self.dispatch(handler);
        Ok(())
    }

    fn drawable_size(&self) -> Extent {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events {
        sizes: Vec<Extent>,
        closed: bool,
    }

    impl WindowEvents for Events {
        fn resized(&mut self, size: Extent) {
            self.sizes.push(size);
        }
        fn close_requested(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_script_delivers_by_pump() {
        let mut window = SimWindow::new(Extent::new(100, 100))
            .at(2, WindowScript::Resize(Extent::default()))
            .at(3, WindowScript::Resize(Extent::new(50, 40)))
            .at(3, WindowScript::Close);
        let mut events = Events::default();

        window.pump_events(&mut events).unwrap();
        assert!(events.sizes.is_empty());

        window.pump_events(&mut events).unwrap();
        assert!(window.drawable_size().is_empty());

        window.wait_events(&mut events).unwrap();
        assert_eq!(window.drawable_size(), Extent::new(50, 40));
        assert_eq!(events.sizes, vec![Extent::default(), Extent::new(50, 40)]);
        assert!(events.closed);
        assert_eq!(window.pumps(), 3);
        assert_eq!(window.waits(), 1);
    }

    #[test]
    fn test_wait_without_script_fails() {
        let mut window = SimWindow::new(Extent::default());
        let mut events = Events::default();
        assert!(window.wait_events(&mut events).is_err());
    }
}
