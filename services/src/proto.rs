//! Wire messages shared by the services.
//!
//! Each message is a prost message, so it can travel as gRPC, and a serde
//! type, so it can travel as JSON over REST and events. The gateway's
//! `Sender` relies on both: RPC input arrives as JSON and leaves as protobuf.

use serde::{Deserialize, Serialize};

/// Request body of `POST /order`.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct CreateOrderMessage {
    /// Item name.
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub name: String,
    /// Amount in minor units.
    #[prost(int32, tag = "2")]
    #[serde(default)]
    pub amount: i32,
}

/// An order as stored by the order service.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct OrderMessage {
    /// Order id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Item name.
    #[prost(string, tag = "2")]
    pub name: String,
    /// Amount in minor units.
    #[prost(int32, tag = "3")]
    pub amount: i32,
    /// `new` or `processed`.
    #[prost(string, tag = "4")]
    pub status: String,
}

/// Payload of the `process-payment` event.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentMessage {
    /// Order being paid.
    #[prost(string, tag = "1")]
    pub order_id: String,
    /// Item name.
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub name: String,
    /// Amount in minor units.
    #[prost(int32, tag = "3")]
    pub amount: i32,
}

/// Request of `payment.Payment/GetPaymentInfo`.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPaymentInfoRequest {
    /// Order whose payment is requested.
    #[prost(string, tag = "1")]
    pub order_id: String,
}

/// A payment as stored by the payment service.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMessage {
    /// Payment id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Paid order.
    #[prost(string, tag = "2")]
    pub order_id: String,
    /// Item name.
    #[prost(string, tag = "3")]
    pub name: String,
    /// Amount in minor units.
    #[prost(int32, tag = "4")]
    pub amount: i32,
    /// Payment status.
    #[prost(string, tag = "5")]
    pub status: String,
}

/// gRPC path of `GetPaymentInfo`.
pub const GET_PAYMENT_INFO_PATH: &str = "/payment.Payment/GetPaymentInfo";
