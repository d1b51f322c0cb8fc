//! Sender-link seam between the sink endpoint and the AMQP transport

use super::message::{AmqpMessage, DeliveryQos, DeliveryTag, ErrorCondition, Source};

/// Operations the sink endpoint performs on its AMQP sender link.
///
/// A transport host implements this for its proton sender. Everything here
/// is called exclusively from the endpoint's reactor task; implementations
/// do not need internal synchronization for the bridge's sake.
///
/// The reverse direction (settlements, credit replenishment, remote
/// detach and close) does not flow through this trait. The transport
/// posts those as [`crate::bridge::LinkEvent`]s through the
/// [`crate::bridge::EndpointHandle`].
pub trait AmqpSender: Send {
    /// Source presented by the attaching remote receiver, if any
    fn remote_source(&self) -> Option<Source>;

    /// Delivery quality negotiated on the link
    fn qos(&self) -> DeliveryQos;

    /// Whether the link is out of credit
    fn queue_full(&self) -> bool;

    /// Open the link, acknowledging the attach with the given local source.
    ///
    /// A `None` source signals the peer that the attach was not honoured;
    /// it is paired with [`AmqpSender::set_condition`] and
    /// [`AmqpSender::close`] when a link is rejected.
    fn open(&mut self, source: Option<Source>);

    /// Set the error condition reported when the link closes
    fn set_condition(&mut self, condition: ErrorCondition);

    /// Close the link
    fn close(&mut self);

    /// Emit a pre-settled transfer (AT_MOST_ONCE)
    fn send_settled(&mut self, tag: &DeliveryTag, message: AmqpMessage);

    /// Emit an unsettled transfer (AT_LEAST_ONCE); the peer's settlement
    /// arrives later as a link event carrying the same tag
    fn send_unsettled(&mut self, tag: &DeliveryTag, message: AmqpMessage);
}
