//! Inspection GUI
//!
//! Single eframe window showing the live camera view, the last annotated
//! capture, and per-detection results (pin counts and text readouts) in a
//! side panel. All pipeline work happens on the worker thread; the GUI only
//! drains its event channel and paints.

use egui::{Button, Color32, Context, TextureHandle, TextureOptions, ViewportCommand};

use crate::pipeline::worker::{Command, Event, WorkerHandle};
use crate::pipeline::CaptureReport;

/// One inspection result ready to paint
struct InspectionPanel {
    texture: TextureHandle,
    label: String,
    count: usize,
    degraded: bool,
}

/// One text readout ready to paint
struct OcrPanel {
    texture: TextureHandle,
    label: String,
    text: String,
}

/// The main inspection window
pub struct InspectorApp {
    /// Channels and status shared with the pipeline worker
    handle: WorkerHandle,
    /// Most recent downscaled live frame
    live_texture: Option<TextureHandle>,
    /// Annotated frame from the last capture cycle
    captured_texture: Option<TextureHandle>,
    inspections: Vec<InspectionPanel>,
    ocr_reads: Vec<OcrPanel>,
    /// Per-detection failures from the last cycle
    notes: Vec<String>,
    /// Set once the worker reports a dead stream; ends the session
    fatal: Option<String>,
}

impl InspectorApp {
    pub fn new(handle: WorkerHandle) -> Self {
        Self {
            handle,
            live_texture: None,
            captured_texture: None,
            inspections: Vec::new(),
            ocr_reads: Vec::new(),
            notes: Vec::new(),
            fatal: None,
        }
    }

    /// Create eframe options for the inspection window
    pub fn options() -> eframe::NativeOptions {
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1100.0, 700.0])
                .with_min_inner_size([800.0, 500.0])
                .with_title("PCB Inspector"),
            ..Default::default()
        }
    }

    /// Drain every pending worker event, keeping only the newest live frame.
    fn drain_events(&mut self, ctx: &Context) {
        while let Ok(event) = self.handle.events.try_recv() {
            match event {
                Event::Live(image) => {
                    self.live_texture =
                        Some(load_texture(ctx, "live-view", &image));
                }
                Event::Captured(report) => self.apply_report(ctx, *report),
                Event::Fatal(message) => {
                    self.fatal = Some(message);
                }
            }
        }
    }

    fn apply_report(&mut self, ctx: &Context, report: CaptureReport) {
        self.captured_texture = Some(load_texture(ctx, "captured-view", &report.display));
        self.notes = report.notes;

        self.inspections = report
            .inspections
            .iter()
            .enumerate()
            .map(|(i, inspection)| InspectionPanel {
                texture: load_texture(ctx, &format!("inspection-{i}"), &inspection.annotated),
                label: inspection.label.clone(),
                count: inspection.count,
                degraded: inspection.degraded,
            })
            .collect();

        self.ocr_reads = report
            .ocr_reads
            .iter()
            .enumerate()
            .map(|(i, readout)| OcrPanel {
                texture: load_texture(ctx, &format!("ocr-{i}"), &readout.image),
                label: readout.label.clone(),
                text: readout.text.clone(),
            })
            .collect();
    }

    fn render_results_panel(&self, ui: &mut egui::Ui) {
        ui.heading("Results");
        ui.separator();

        egui::ScrollArea::vertical().show(ui, |ui| {
            if self.inspections.is_empty() && self.ocr_reads.is_empty() {
                ui.label("No analyzed components yet.");
            }

            for panel in &self.inspections {
                ui.group(|ui| {
                    ui.strong(&panel.label);
                    ui.image(&panel.texture);
                    if panel.degraded {
                        ui.colored_label(Color32::YELLOW, "inspection failed");
                    } else {
                        ui.label(format!("Pins counted: {}", panel.count));
                    }
                });
                ui.add_space(8.0);
            }

            for panel in &self.ocr_reads {
                ui.group(|ui| {
                    ui.strong(&panel.label);
                    ui.image(&panel.texture);
                    ui.label(format!("Text: {}", panel.text));
                });
                ui.add_space(8.0);
            }
        });
    }

    fn render_status_bar(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let status = self.handle.status.read().clone();

            if let Some(message) = &self.fatal {
                ui.colored_label(Color32::RED, format!("Stream failed: {message}"));
            } else if status.connected {
                ui.colored_label(Color32::GREEN, "Connected");
            } else if let Some(error) = &status.last_error {
                // Worker already recorded the cause even if its Fatal event
                // has not been drained yet.
                ui.colored_label(Color32::RED, format!("Stream failed: {error}"));
            } else {
                ui.colored_label(Color32::YELLOW, "Disconnected");
            }

            ui.separator();
            ui.label(format!("Frames: {}", status.frames_read));
            ui.separator();
            ui.label(format!("Captures: {}", status.captures));

            for note in &self.notes {
                ui.separator();
                ui.colored_label(Color32::YELLOW, note);
            }
        });
    }
}

impl eframe::App for InspectorApp {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        self.drain_events(ctx);

        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let can_capture = self.fatal.is_none();
                if ui
                    .add_enabled(can_capture, Button::new("Capture"))
                    .clicked()
                {
                    let _ = self.handle.commands.send(Command::Capture);
                }
                if ui.button("Exit").clicked() {
                    ctx.send_viewport_cmd(ViewportCommand::Close);
                }
            });
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            self.render_status_bar(ui);
        });

        egui::SidePanel::right("results")
            .resizable(true)
            .default_width(280.0)
            .show(ctx, |ui| {
                self.render_results_panel(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |columns| {
                columns[0].heading("Live");
                match &self.live_texture {
                    Some(texture) => {
                        columns[0].image(texture);
                    }
                    None => {
                        columns[0].label("Waiting for stream...");
                    }
                }

                columns[1].heading("Last capture");
                match &self.captured_texture {
                    Some(texture) => {
                        columns[1].image(texture);
                    }
                    None => {
                        columns[1].label("No capture yet.");
                    }
                }
            });
        });

        // The live view only advances if we keep painting.
        ctx.request_repaint();
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.handle.shutdown();
    }
}

fn load_texture(ctx: &Context, name: &str, image: &image::RgbImage) -> TextureHandle {
    let (w, h) = image.dimensions();
    let color_image = egui::ColorImage::from_rgb([w as usize, h as usize], image.as_raw());
    ctx.load_texture(name, color_image, TextureOptions::LINEAR)
}

/// Run the inspection window (blocking)
pub fn run(handle: WorkerHandle) -> Result<(), eframe::Error> {
    let app = InspectorApp::new(handle);
    eframe::run_native(
        "PCB Inspector",
        InspectorApp::options(),
        Box::new(|_cc| Ok(Box::new(app))),
    )
}
