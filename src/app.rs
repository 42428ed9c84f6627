//! Window and event loop.
//!
//! The window only exists after winit's `resumed` callback, so the app starts
//! out [`CausticaApp::Pending`] with its configuration and becomes
//! [`CausticaApp::Running`] once the GPU backend and the frame driver are set
//! up. Redraws are requested continuously.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::backend::WgpuBackend;
use crate::config::AppConfig;
use crate::driver::FrameDriver;
use crate::input::Input;
use crate::resources::Extent;
use crate::shaders::ProgramLibrary;

/// Opens the window and renders until it is closed or Escape is pressed.
pub fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = CausticaApp::Pending { config };
    event_loop
        .run_app(&mut app)
        .context("Event loop terminated abnormally")?;

    match app {
        CausticaApp::Failed(err) => Err(err),
        _ => Ok(()),
    }
}

enum CausticaApp {
    Pending {
        config: AppConfig,
    },
    Running {
        window: Arc<Window>,
        driver: FrameDriver<WgpuBackend>,
        input: Input,
        title: String,
        last_frame: Instant,
        timer: FrameTimer,
    },
    Failed(anyhow::Error),
}

/// Averages frame times over a reporting interval.
#[derive(Debug, Default)]
struct FrameTimer {
    elapsed: f32,
    frames: u32,
}

impl FrameTimer {
    const INTERVAL: f32 = 1.0;

    /// Adds one frame. Returns the mean frame time in seconds once per interval.
    fn record(&mut self, dt: f32) -> Option<f32> {
        self.elapsed += dt;
        self.frames += 1;
        if self.elapsed < Self::INTERVAL {
            return None;
        }
        let mean = self.elapsed / self.frames as f32;
        *self = Self::default();
        Some(mean)
    }
}

impl CausticaApp {
    fn start(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(&config.window.title)
            .with_inner_size(LogicalSize::new(config.window.width, config.window.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("Failed to create window")?,
        );

        let library = ProgramLibrary::from_dir(&config.shader_dir);
        let backend = WgpuBackend::new(window.clone(), library)
            .context("Failed to initialize the GPU")?;
        let screen = backend.screen();
        let driver = FrameDriver::new(backend, config, screen)?;
        info!("Scene ready at {}x{}", screen.width, screen.height);

        Ok(Self::Running {
            window,
            driver,
            input: Input::new(),
            title: config.window.title.clone(),
            last_frame: Instant::now(),
            timer: FrameTimer::default(),
        })
    }
}

impl ApplicationHandler for CausticaApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let CausticaApp::Pending { config } = self else {
            return;
        };
        *self = match Self::start(event_loop, config) {
            Ok(running) => running,
            Err(err) => {
                error!("Startup failed: {err:#}");
                event_loop.exit();
                CausticaApp::Failed(err)
            }
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let CausticaApp::Running {
            window,
            driver,
            input,
            title,
            last_frame,
            timer,
        } = self
        else {
            return;
        };

        input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = driver.resize(Extent::new(size.width, size.height)) {
                    error!("Resize failed: {err}");
                    *self = CausticaApp::Failed(anyhow!(err).context("Failed to resize"));
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(*last_frame).as_secs_f32();
                *last_frame = now;

                let was_suspended = driver.is_suspended();
                let render_start = Instant::now();
                let outcome = driver.frame(&input.snapshot(dt));
                input.begin_frame();
                if let Some(mean) = timer.record(dt) {
                    debug!(
                        "Render time {:.2} ms, frame time {:.2} ms ({:.0} fps)",
                        render_start.elapsed().as_secs_f64() * 1000.0,
                        mean * 1000.0,
                        1.0 / mean
                    );
                }

                if outcome.exit {
                    event_loop.exit();
                    return;
                }
                if driver.is_suspended() != was_suspended {
                    match driver.reload_error() {
                        Some(err) => {
                            warn!("Showing the last good frame until shaders compile");
                            window.set_title(&format!("{title} [{err}]"));
                        }
                        None => window.set_title(title),
                    }
                }
                window.request_redraw();
            }
            _ => (),
        }
    }
}
