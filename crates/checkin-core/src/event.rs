/// Asynchronous notification exchanged between the processes of the system
///
/// Each event is delivered as a UNIX signal; the mapping lives next to the
/// code that installs the handlers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum Event {
    /// The worker checked the passenger in
    ///
    /// 📌 Observed by the client.
    ClientAccepted,

    /// The worker refused the request (unknown passenger, wrong password or a
    /// database failure before the acknowledgement)
    ///
    /// 📌 Observed by the client.
    ClientRejected,

    /// Interrupt from the outside world
    ///
    /// The client gives up quietly; the dispatcher starts its shutdown.
    InterruptRequested,

    /// The client's own timer ran out before any answer arrived
    TimeoutExpired,

    /// The dispatcher asks a worker to stop immediately
    ///
    /// 📌 Observed by workers.
    WorkerTerminate,

    /// A worker process ended
    ///
    /// 📌 Observed by the dispatcher.
    ChildExited,
}

impl Event {
    /// All events, in declaration order
    pub const ALL: [Event; 6] = [
        Event::ClientAccepted,
        Event::ClientRejected,
        Event::InterruptRequested,
        Event::TimeoutExpired,
        Event::WorkerTerminate,
        Event::ChildExited,
    ];

    /// Bit of this event in an event set
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Events contained in the bit set `bits`
    pub fn from_bits(bits: u8) -> impl Iterator<Item = Event> {
        Self::ALL.into_iter().filter(move |e| bits & e.bit() != 0)
    }

    /// Exit code of a client that observed this event
    ///
    /// Returns [`None`] for events a client never waits for.
    pub fn client_exit_code(self) -> Option<i32> {
        match self {
            Event::ClientAccepted | Event::InterruptRequested => Some(0),
            Event::ClientRejected | Event::TimeoutExpired => Some(1),
            Event::WorkerTerminate | Event::ChildExited => None,
        }
    }
}
