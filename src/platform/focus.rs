//! Active window lookup through _NET_ACTIVE_WINDOW

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

/// Pre-cached X11 atoms to avoid repeated roundtrips
struct CachedAtoms {
    net_active_window: Atom,
    net_wm_name: Atom,
    utf8_string: Atom,
}

impl CachedAtoms {
    fn new(conn: &RustConnection) -> Result<Self> {
        Ok(Self {
            net_active_window: intern(conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_name: intern(conn, b"_NET_WM_NAME")?,
            utf8_string: intern(conn, b"UTF8_STRING")?,
        })
    }
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom> {
    let label = String::from_utf8_lossy(name);
    Ok(conn
        .intern_atom(false, name)
        .with_context(|| format!("Failed to intern {} atom", label))?
        .reply()
        .with_context(|| format!("Failed to get reply for {} atom", label))?
        .atom)
}

/// Reads the title of the focused window
pub struct X11FocusProbe {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
}

impl X11FocusProbe {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X11 server")?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = CachedAtoms::new(&conn)?;
        Ok(Self { conn, root, atoms })
    }

    /// Title of the active window, or `None` when nothing is focused
    pub fn active_window_title(&self) -> Result<Option<String>> {
        let active = self
            .conn
            .get_property(false, self.root, self.atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
            .context("Failed to query _NET_ACTIVE_WINDOW property")?
            .reply()
            .context("Failed to get reply for _NET_ACTIVE_WINDOW query")?;

        let Some(window) = active.value32().and_then(|mut values| values.next()) else {
            return Ok(None);
        };
        if window == x11rb::NONE {
            return Ok(None);
        }

        let name = self
            .conn
            .get_property(false, window, self.atoms.net_wm_name, self.atoms.utf8_string, 0, 256)
            .with_context(|| format!("Failed to query _NET_WM_NAME for window {}", window))?
            .reply()
            .with_context(|| format!("Failed to get _NET_WM_NAME reply for window {}", window))?;
        if !name.value.is_empty() {
            return Ok(Some(String::from_utf8_lossy(&name.value).into_owned()));
        }

        // Legacy WM_NAME
        let name = self
            .conn
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::STRING, 0, 256)
            .with_context(|| format!("Failed to query WM_NAME for window {}", window))?
            .reply()
            .with_context(|| format!("Failed to get WM_NAME reply for window {}", window))?;
        if name.value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&name.value).into_owned()))
        }
    }
}
