use std::{
    f32::consts::TAU,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use eframe::egui::{self, Align2, Color32, FontFamily, FontId, Pos2, Rect, Stroke, Vec2};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    ambient::{CommentInstruction, Lane},
    animation::{AnimationContent, AnimationInstruction, ANIMATION_EXTENT},
    dispatch::Viewport,
    events::OverlayUpdate,
    overlay::OverlayView,
};

const COMMENT_FONT_SIZE: f32 = 36.0;
const GLYPH_FONT_SIZE: f32 = 64.0;
const PULSE_HZ: f32 = 1.6;
const FIREWORK_SPARKS: usize = 24;
const FIREWORK_COLORS: [Color32; 5] = [
    Color32::from_rgb(255, 80, 80),
    Color32::from_rgb(255, 210, 60),
    Color32::from_rgb(90, 200, 255),
    Color32::from_rgb(160, 110, 255),
    Color32::from_rgb(120, 255, 150),
];

pub struct OverlayApp {
    view: OverlayView,
    updates: Receiver<OverlayUpdate>,
    viewport_tx: watch::Sender<Viewport>,
    last_viewport: Option<Viewport>,
    scroll: Duration,
    fonts: Vec<String>,
}

impl OverlayApp {
    pub fn new(
        ctx: &egui::Context,
        view: OverlayView,
        updates: Receiver<OverlayUpdate>,
        viewport_tx: watch::Sender<Viewport>,
        scroll: Duration,
        fonts_dir: &Path,
    ) -> Self {
        let fonts = install_fonts(ctx, fonts_dir);
        Self {
            view,
            updates,
            viewport_tx,
            last_viewport: None,
            scroll,
            fonts,
        }
    }

    fn publish_viewport(&mut self, viewport: Viewport) {
        if self.last_viewport == Some(viewport) {
            return;
        }
        debug!(width = viewport.width, height = viewport.height, "overlay viewport changed");
        self.viewport_tx.send_replace(viewport);
        self.last_viewport = Some(viewport);
    }

    fn draw_comment(&self, painter: &egui::Painter, screen: Rect, comment: &CommentInstruction) {
        let Some(progress) = scroll_progress(comment.age, self.scroll) else {
            return;
        };
        let family = font_family_for(&comment.font_family, &self.fonts);
        let color = parse_hex_color(comment.color).unwrap_or(Color32::BLACK);
        let galley = painter.layout_no_wrap(
            comment.text.clone(),
            FontId::new(COMMENT_FONT_SIZE, family),
            with_alpha(color, comment.opacity),
        );
        let size = galley.size();
        let pos = match comment.lane {
            Lane::Side => Pos2::new(
                screen.min.x + comment.anchor.x - progress * (comment.anchor.x + size.x),
                screen.min.y + comment.anchor.y,
            ),
            Lane::Top => Pos2::new(
                screen.min.x + comment.anchor.x,
                screen.min.y - size.y + progress * (screen.height() + size.y),
            ),
        };
        painter.galley(pos, galley, Color32::BLACK);
    }

    fn draw_animation(&self, painter: &egui::Painter, screen: Rect, animation: &AnimationInstruction) {
        if !animation.visible {
            return;
        }
        let rect = Rect::from_min_size(
            screen.min + Vec2::new(animation.position.x, animation.position.y),
            Vec2::splat(ANIMATION_EXTENT),
        );
        let t = animation.age.as_secs_f32();
        match &animation.content {
            AnimationContent::Glyphs(glyphs) => draw_glyph_row(painter, rect, glyphs, t),
            AnimationContent::Fireworks => draw_fireworks(painter, rect, t),
        }
    }
}

impl eframe::App for OverlayApp {
    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.0; 4]
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(Duration::from_millis(33));
        self.view.drain(&self.updates);

        let screen = ctx.screen_rect();
        let viewport = Viewport::new(screen.width(), screen.height());
        self.publish_viewport(viewport);

        // Transparent base panel keeps the clear pass alpha.
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |_ui| {});

        let frame = self.view.frame(viewport, Instant::now());
        let painter = ctx.layer_painter(egui::LayerId::new(
            egui::Order::Foreground,
            egui::Id::new("presenter_overlay_layer"),
        ));
        for comment in &frame.comments {
            self.draw_comment(&painter, screen, comment);
        }
        for animation in &frame.animations {
            self.draw_animation(&painter, screen, animation);
        }
    }
}

fn draw_glyph_row(painter: &egui::Painter, rect: Rect, glyphs: &[String], t: f32) {
    if glyphs.is_empty() {
        return;
    }
    let pulse = 1.0 + (t * PULSE_HZ * TAU).sin() * 0.15;
    let size = (GLYPH_FONT_SIZE * pulse).min(rect.width() / glyphs.len() as f32 * 1.6);
    let step = rect.width() / glyphs.len() as f32;
    for (idx, glyph) in glyphs.iter().enumerate() {
        let phase = idx as f32 * 0.35;
        let bounce = (t * PULSE_HZ * TAU + phase).sin() * 8.0;
        let center = Pos2::new(
            rect.min.x + step * (idx as f32 + 0.5),
            rect.center().y + bounce,
        );
        for (dx, dy) in [(-2.0_f32, 0.0_f32), (2.0, 0.0), (0.0, -2.0), (0.0, 2.0)] {
            painter.text(
                Pos2::new(center.x + dx, center.y + dy),
                Align2::CENTER_CENTER,
                glyph,
                FontId::proportional(size),
                with_alpha(Color32::BLACK, 0.6),
            );
        }
        painter.text(
            center,
            Align2::CENTER_CENTER,
            glyph,
            FontId::proportional(size),
            Color32::from_rgb(255, 200, 40),
        );
    }
}

fn draw_fireworks(painter: &egui::Painter, rect: Rect, t: f32) {
    let center = rect.center();
    let max_radius = rect.width() * 0.5;
    // One burst per second, fading as it expands.
    let cycle = t.fract();
    let radius = max_radius * cycle.sqrt();
    let fade = 1.0 - cycle;
    for spark in 0..FIREWORK_SPARKS {
        let angle = spark as f32 / FIREWORK_SPARKS as f32 * TAU;
        let dir = Vec2::angled(angle);
        let color = with_alpha(FIREWORK_COLORS[spark % FIREWORK_COLORS.len()], fade);
        let tip = center + dir * radius;
        let tail = center + dir * (radius * 0.6);
        painter.line_segment([tail, tip], Stroke::new(3.0, color));
        painter.circle_filled(tip, 3.5, color);
    }
    painter.circle_filled(center, 6.0 * fade, with_alpha(Color32::WHITE, fade));
}

/// Share of the scroll already travelled, or `None` once it has finished.
fn scroll_progress(age: Duration, scroll: Duration) -> Option<f32> {
    if scroll.is_zero() {
        return None;
    }
    let progress = age.as_secs_f32() / scroll.as_secs_f32();
    (progress < 1.0).then_some(progress)
}

/// First family of a CSS-style list, without quotes.
fn primary_family(css: &str) -> &str {
    css.split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|ch| ch == '\'' || ch == '"')
}

fn font_family_for(css: &str, registered: &[String]) -> FontFamily {
    let name = primary_family(css);
    if registered.iter().any(|known| known == name) {
        FontFamily::Name(name.into())
    } else {
        FontFamily::Proportional
    }
}

fn install_fonts(ctx: &egui::Context, fonts_dir: &Path) -> Vec<String> {
    let Some(dir) = resolve_fonts_dir(fonts_dir) else {
        debug!(path = %fonts_dir.display(), "no font directory; using default font");
        return Vec::new();
    };
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(?err, path = %dir.display(), "failed reading font directory");
            return Vec::new();
        }
    };

    let mut fonts = egui::FontDefinitions::default();
    let fallback = fonts
        .families
        .get(&FontFamily::Proportional)
        .cloned()
        .unwrap_or_default();
    let mut names = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_font = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
            .unwrap_or(false);
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if !is_font {
            continue;
        }
        match fs::read(&path) {
            Ok(bytes) => {
                let name = name.to_owned();
                fonts
                    .font_data
                    .insert(name.clone(), egui::FontData::from_owned(bytes));
                let mut chain = vec![name.clone()];
                chain.extend(fallback.iter().cloned());
                fonts
                    .families
                    .insert(FontFamily::Name(name.as_str().into()), chain);
                names.push(name);
            }
            Err(err) => warn!(?err, path = %path.display(), "failed reading font file"),
        }
    }

    if !names.is_empty() {
        ctx.set_fonts(fonts);
        info!(fonts = ?names, "loaded overlay fonts");
    }
    names
}

fn resolve_fonts_dir(fonts_dir: &Path) -> Option<PathBuf> {
    if fonts_dir.is_dir() {
        return Some(fonts_dir.to_path_buf());
    }
    if fonts_dir.is_absolute() {
        return None;
    }
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join(fonts_dir);
    candidate.is_dir().then_some(candidate)
}

fn with_alpha(color: Color32, multiplier: f32) -> Color32 {
    let alpha = ((color.a() as f32) * multiplier).clamp(0.0, 255.0) as u8;
    Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), alpha)
}

fn parse_hex_color(value: &str) -> Option<Color32> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color32::from_rgb(r, g, b))
}
