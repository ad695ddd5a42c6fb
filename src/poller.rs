//! Bus connection polling.

use log::{debug, info};

use crate::drivers::device::DeviceHandle;
use crate::drivers::usb::{ConnectionState, PortQuery, PortReply, UsbPort};

/// Tracks the port's connection state between polls
#[derive(Debug)]
pub struct Poller {
    last: ConnectionState,
    polls: u32,
}

impl Poller {
    pub fn new() -> Self {
        Self { last: ConnectionState::Disconnected, polls: 0 }
    }

    /// Last state returned by [`Poller::poll`]
    pub fn last(&self) -> ConnectionState {
        self.last
    }

    /// Number of polls issued so far
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Query the port's connection state.
    ///
    /// A `Connected` answer is followed by a second query straight away,
    /// since enumeration often completes between the two. A failed query
    /// reads as `Disconnected`.
    pub fn poll<P: UsbPort>(&mut self, port: &mut P, handle: &DeviceHandle) -> ConnectionState {
        self.polls = self.polls.wrapping_add(1);
        let mut state = query_state(port, handle);
        if state == ConnectionState::Connected {
            state = query_state(port, handle);
        }

        if state != self.last {
            match state {
                ConnectionState::Enumerated => info!("device enumerated"),
                ConnectionState::Connected => info!("device connected, waiting for enumeration"),
                ConnectionState::Disconnected => info!("device disconnected"),
            }
            self.last = state;
        }
        state
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

fn query_state<P: UsbPort>(port: &mut P, handle: &DeviceHandle) -> ConnectionState {
    match port.query(handle, PortQuery::ConnectState) {
        Ok(PortReply::ConnectState(state)) => state,
        Ok(other) => {
            debug!("unexpected reply to connect state query: {:?}", other);
            ConnectionState::Disconnected
        }
        Err(err) => {
            debug!("connect state query failed: {}", err);
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::device::Device;
    use crate::sim::SimPort;

    #[test]
    fn test_connected_is_queried_twice() {
        let mut port = SimPort::new(ConnectionState::Enumerated);
        port.script(&[ConnectionState::Connected, ConnectionState::Enumerated]);
        let handle = port.open().unwrap();
        let mut poller = Poller::new();

        assert_eq!(poller.poll(&mut port, &handle), ConnectionState::Enumerated);
        assert_eq!(port.state_queries(), 2);
        port.close(handle);
    }

    #[test]
    fn test_disconnected_is_queried_once() {
        let mut port = SimPort::new(ConnectionState::Disconnected);
        let handle = port.open().unwrap();
        let mut poller = Poller::new();

        assert_eq!(poller.poll(&mut port, &handle), ConnectionState::Disconnected);
        assert_eq!(port.state_queries(), 1);
        port.close(handle);
    }

    #[test]
    fn test_still_connected_after_second_query() {
        let mut port = SimPort::new(ConnectionState::Connected);
        let handle = port.open().unwrap();
        let mut poller = Poller::new();

        assert_eq!(poller.poll(&mut port, &handle), ConnectionState::Connected);
        assert_eq!(port.state_queries(), 2);
        assert_eq!(poller.last(), ConnectionState::Connected);
        assert_eq!(poller.polls(), 1);
        port.close(handle);
    }
}
