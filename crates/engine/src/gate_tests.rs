// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn close_serialises_mutation() {
    let gate = Gate::new(0u32);
    {
        let mut guard = gate.close();
        *guard += 1;
    }
    assert_eq!(*gate.close(), 1);
}

#[test]
fn try_close_fails_while_closed() {
    let gate = Gate::new(());
    let guard = gate.close();
    assert!(gate.try_close().is_none());
    drop(guard);
    assert!(gate.try_close().is_some());
}
