// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Traits and objects that abstract over differences between guest OS
//! distributions.

use std::time::Duration;

use crate::console::ConsoleScript;

mod alpine;
mod cirros;

/// How long a guest may take to show its login prompt and accept a login.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(180);

pub trait GuestOs: Send + Sync {
    /// Returns the script that waits for the guest's login prompt and logs
    /// into it, leaving the console at a shell prompt.
    fn login_script(&self) -> ConsoleScript;

    /// Retrieves the default shell prompt for this OS.
    fn shell_prompt(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestOsKind {
    Alpine,
    Cirros,
}

pub fn get_guest_os_adapter(kind: GuestOsKind) -> Box<dyn GuestOs> {
    match kind {
        GuestOsKind::Alpine => Box::new(alpine::Alpine),
        GuestOsKind::Cirros => Box::new(cirros::Cirros),
    }
}
