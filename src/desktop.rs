//! Desktop shell bookkeeping: which apps are open, where, and in what order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DesktopError;

const CASCADE_ORIGIN: i32 = 40;
const CASCADE_STEP: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    MyComputer,
    Documents,
    Chat,
    Pong,
    Bird,
    Runner,
    Browser,
    FileShare,
}

impl AppKind {
    pub const ALL: [AppKind; 8] = [
        AppKind::MyComputer,
        AppKind::Documents,
        AppKind::Chat,
        AppKind::Pong,
        AppKind::Bird,
        AppKind::Runner,
        AppKind::Browser,
        AppKind::FileShare,
    ];

    pub fn id(self) -> &'static str {
        match self {
            AppKind::MyComputer => "my-computer",
            AppKind::Documents => "documents",
            AppKind::Chat => "chat",
            AppKind::Pong => "pong",
            AppKind::Bird => "bird",
            AppKind::Runner => "runner",
            AppKind::Browser => "browser",
            AppKind::FileShare => "file-share",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            AppKind::MyComputer => "My Computer",
            AppKind::Documents => "Documents",
            AppKind::Chat => "Neural Link",
            AppKind::Pong => "Neural Pong",
            AppKind::Bird => "Neural Bird",
            AppKind::Runner => "Neural Runner",
            AppKind::Browser => "Neural Browser",
            AppKind::FileShare => "Neural Share",
        }
    }

    /// full apps take over the desktop; opening one closes everything else
    pub fn is_exclusive(self) -> bool {
        !matches!(self, AppKind::MyComputer | AppKind::Documents)
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    pub app: AppKind,
    pub title: &'static str,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum DesktopCommand {
    Open { app: AppKind },
    Close { app: AppKind },
    Focus { app: AppKind },
    Move { app: AppKind, x: i32, y: i32 },
}

/// read-only view handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesktopSnapshot {
    /// back to front
    pub windows: Vec<Window>,
    pub active: Option<AppKind>,
}

/// owns the window list; last entry is the front window
#[derive(Debug, Default)]
pub struct Desktop {
    windows: Vec<Window>,
}

impl Desktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, command: DesktopCommand) -> Result<(), DesktopError> {
        tracing::debug!("Desktop command {:?}", command);
        match command {
            DesktopCommand::Open { app } => {
                self.open(app);
                Ok(())
            }
            DesktopCommand::Close { app } => {
                let idx = self.position(app)?;
                self.windows.remove(idx);
                Ok(())
            }
            DesktopCommand::Focus { app } => {
                let idx = self.position(app)?;
                let window = self.windows.remove(idx);
                self.windows.push(window);
                Ok(())
            }
            DesktopCommand::Move { app, x, y } => {
                let idx = self.position(app)?;
                self.windows[idx].x = x;
                self.windows[idx].y = y;
                Ok(())
            }
        }
    }

    fn open(&mut self, app: AppKind) {
        if let Ok(idx) = self.position(app) {
            let window = self.windows.remove(idx);
            self.windows.push(window);
            return;
        }
        if app.is_exclusive() {
            self.windows.clear();
        }
        let offset = CASCADE_STEP * self.windows.len() as i32;
        self.windows.push(Window {
            app,
            title: app.title(),
            x: CASCADE_ORIGIN + offset,
            y: CASCADE_ORIGIN + offset,
        });
    }

    fn position(&self, app: AppKind) -> Result<usize, DesktopError> {
        self.windows
            .iter()
            .position(|w| w.app == app)
            .ok_or_else(|| DesktopError::NotOpen(app.to_string()))
    }

    pub fn active(&self) -> Option<AppKind> {
        self.windows.last().map(|w| w.app)
    }

    pub fn is_open(&self, app: AppKind) -> bool {
        self.windows.iter().any(|w| w.app == app)
    }

    pub fn snapshot(&self) -> DesktopSnapshot {
        DesktopSnapshot {
            windows: self.windows.clone(),
            active: self.active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_twice_only_focuses() {
        let mut desktop = Desktop::new();
        desktop.apply(DesktopCommand::Open { app: AppKind::MyComputer }).unwrap();
        desktop.apply(DesktopCommand::Open { app: AppKind::Documents }).unwrap();
        desktop.apply(DesktopCommand::Open { app: AppKind::MyComputer }).unwrap();

        let snapshot = desktop.snapshot();
        assert_eq!(snapshot.windows.len(), 2);
        assert_eq!(snapshot.active, Some(AppKind::MyComputer));
        assert_eq!(snapshot.windows[0].app, AppKind::Documents);
    }

    #[test]
    fn windows_cascade() {
        let mut desktop = Desktop::new();
        desktop.apply(DesktopCommand::Open { app: AppKind::MyComputer }).unwrap();
        desktop.apply(DesktopCommand::Open { app: AppKind::Documents }).unwrap();
        let windows = desktop.snapshot().windows;
        assert_eq!((windows[0].x, windows[0].y), (40, 40));
        assert_eq!((windows[1].x, windows[1].y), (70, 70));
        assert_eq!(windows[1].title, "Documents");
    }

    #[test]
    fn exclusive_apps_replace_the_desktop() {
        let mut desktop = Desktop::new();
        desktop.apply(DesktopCommand::Open { app: AppKind::Documents }).unwrap();
        desktop.apply(DesktopCommand::Open { app: AppKind::FileShare }).unwrap();
        let snapshot = desktop.snapshot();
        assert_eq!(snapshot.windows.len(), 1);
        assert_eq!(snapshot.active, Some(AppKind::FileShare));
    }

    #[test]
    fn move_focus_and_close() {
        let mut desktop = Desktop::new();
        desktop.apply(DesktopCommand::Open { app: AppKind::MyComputer }).unwrap();
        desktop.apply(DesktopCommand::Open { app: AppKind::Documents }).unwrap();
        desktop
            .apply(DesktopCommand::Move { app: AppKind::MyComputer, x: 5, y: -3 })
            .unwrap();
        desktop.apply(DesktopCommand::Focus { app: AppKind::MyComputer }).unwrap();
        assert_eq!(desktop.active(), Some(AppKind::MyComputer));
        assert_eq!(desktop.snapshot().windows[1].x, 5);

        desktop.apply(DesktopCommand::Close { app: AppKind::MyComputer }).unwrap();
        assert_eq!(desktop.active(), Some(AppKind::Documents));
        assert!(!desktop.is_open(AppKind::MyComputer));
    }

    #[test]
    fn commands_on_closed_windows_fail() {
        let mut desktop = Desktop::new();
        let err = desktop.apply(DesktopCommand::Close { app: AppKind::Chat }).unwrap_err();
        assert!(matches!(err, DesktopError::NotOpen(id) if id == "chat"));
    }

    #[test]
    fn commands_deserialize_from_json() {
        let command: DesktopCommand =
            serde_json::from_str(r#"{"action":"move","app":"file-share","x":1,"y":2}"#).unwrap();
        assert_eq!(command, DesktopCommand::Move { app: AppKind::FileShare, x: 1, y: 2 });
    }
}
