//! common type definitions

use core::marker::PhantomData;

/// Marker type to ensure a type is not [Send]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct NotSend {
    _mark: PhantomData<*const ()>,
}

/// Default value for [NotSend]
#[allow(non_upper_case_globals)]
pub const NotSend: NotSend = NotSend { _mark: PhantomData };
