// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest OS adaptations for the CirrOS container disk.

use super::{GuestOs, LOGIN_TIMEOUT};
use crate::console::{ConsoleScript, Pattern};

pub(super) struct Cirros;

impl GuestOs for Cirros {
    fn login_script(&self) -> ConsoleScript {
        ConsoleScript::new(LOGIN_TIMEOUT)
            .send_expect("", Pattern::literal("login:"))
            .send_expect("cirros", Pattern::literal("Password:"))
            .send_expect("gocubsgo", Pattern::literal(self.shell_prompt()))
    }

    fn shell_prompt(&self) -> &'static str {
        "$ "
    }
}
