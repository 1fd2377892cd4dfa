use std::str::FromStr;

use crate::video::picture::Picture;

/// Destination rectangle inside the output surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scales a picture of square pixels into `surface` keeping its aspect
/// ratio, centered, with even dimensions.
pub fn fit_rect(surface: (u32, u32), picture: (u32, u32)) -> Rect {
    let (surface_width, surface_height) = surface;
    let (width, height) = picture;

    if width == 0 || height == 0 || surface_width == 0 || surface_height == 0 {
        return Rect { x: 0, y: 0, width: 0, height: 0 };
    }

    let aspect = f64::from(width) / f64::from(height);

    let mut out_height = surface_height;
    let mut out_width = even((f64::from(out_height) * aspect).round() as u32);

    if out_width > surface_width {
        out_width = surface_width;
        out_height = even((f64::from(out_width) / aspect).round() as u32);
    }

    Rect {
        x: (surface_width - out_width) / 2,
        y: (surface_height - out_height) / 2,
        width: out_width,
        height: out_height,
    }
}

fn even(value: u32) -> u32 {
    value & !1
}

/// Final sink for pictures. Runs on the refresh actor.
pub trait Presenter: Send {
    /// Surface size, `None` to present at the picture's own size.
    fn surface(&self) -> Option<(u32, u32)> {
        None
    }

    fn present(&mut self, picture: &Picture, rect: Rect);
}

/// Presentation rectangle for `picture` on `presenter`.
pub fn rect_for(presenter: &dyn Presenter, picture: &Picture) -> Rect {
    let size = (picture.width(), picture.height());
    fit_rect(presenter.surface().unwrap_or(size), size)
}

/// Discards every picture.
#[derive(Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _picture: &Picture, _rect: Rect) {}
}

/// Output surface size, parsed from `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Surface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid surface {s:?}, expected WIDTHxHEIGHT");

        let (width, height) = s.split_once('x').ok_or_else(invalid)?;
        let width = width.parse().map_err(|_| invalid())?;
        let height = height.parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Surface { width, height })
    }
}

/// Logs each presented picture at trace level.
#[derive(Debug, Default)]
pub struct LogPresenter {
    surface: Option<Surface>,
}

impl LogPresenter {
    pub fn new(surface: Option<Surface>) -> Self {
        LogPresenter { surface }
    }
}

impl Presenter for LogPresenter {
    fn surface(&self) -> Option<(u32, u32)> {
        self.surface.map(|surface| (surface.width, surface.height))
    }

    fn present(&mut self, picture: &Picture, rect: Rect) {
        tracing::trace!(
            pts = picture.pts,
            width = picture.width(),
            height = picture.height(),
            ?rect,
            "present",
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterKind {
    Null,
    Log,
}

impl PresenterKind {
    /// `surface` only matters to presenters that draw somewhere.
    pub fn open(self, surface: Option<Surface>) -> Box<dyn Presenter> {
        match self {
            PresenterKind::Null => Box::new(NullPresenter),
            PresenterKind::Log => Box::new(LogPresenter::new(surface)),
        }
    }
}

impl FromStr for PresenterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" => Ok(PresenterKind::Null),
            "log" => Ok(PresenterKind::Log),
            _ => Err(format!("unknown presenter {s:?}, expected null or log")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_picture_is_letterboxed() {
        let rect = fit_rect((640, 480), (1280, 720));
        assert_eq!(rect, Rect { x: 0, y: 60, width: 640, height: 360 });
    }

    #[test]
    fn tall_picture_is_pillarboxed() {
        let rect = fit_rect((640, 480), (320, 480));
        assert_eq!(rect, Rect { x: 160, y: 0, width: 320, height: 480 });
    }

    #[test]
    fn log_presenter_fits_into_its_surface() {
        let surface = "640x480".parse::<Surface>().unwrap();
        let presenter = PresenterKind::Log.open(Some(surface));
        let picture = Picture::allocate(1280, 720);
        assert_eq!(rect_for(presenter.as_ref(), &picture), Rect { x: 0, y: 60, width: 640, height: 360 });
    }

    #[test]
    fn parse_surface() {
        assert_eq!("800x600".parse::<Surface>(), Ok(Surface { width: 800, height: 600 }));
        assert!("800".parse::<Surface>().is_err());
        assert!("0x600".parse::<Surface>().is_err());
    }

    #[test]
    fn dimensions_are_even() {
        let rect = fit_rect((641, 481), (333, 251));
        assert_eq!(rect.width % 2, 0);
        assert_eq!(rect.height % 2, 0);
        assert!(rect.x + rect.width <= 641);
        assert!(rect.y + rect.height <= 481);
    }

    #[test]
    fn native_size_when_no_surface() {
        let picture = Picture::allocate(320, 240);
        let rect = rect_for(&NullPresenter, &picture);
        assert_eq!(rect, Rect { x: 0, y: 0, width: 320, height: 240 });
    }
}
