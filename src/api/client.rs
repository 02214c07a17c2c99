use std::future::Future;

use chrono::NaiveDate;
use reqwest::header::HeaderName;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::ClientError;
use crate::config::ClientConfig;
use crate::models::{Appointment, BookingRequest, LiveQueueSnapshot, PeakHourCheck};

/// Backend operations the queue client needs.
///
/// Futures are `Send` so pollers and push handlers can run them on spawned
/// tasks.
pub trait QueueApi: Send + Sync + 'static {
    fn list_appointments(
        &self,
    ) -> impl Future<Output = Result<Vec<Appointment>, ClientError>> + Send;

    fn live_queue(
        &self,
        appointment_id: &str,
    ) -> impl Future<Output = Result<LiveQueueSnapshot, ClientError>> + Send;

    fn book_appointment(
        &self,
        request: &BookingRequest,
    ) -> impl Future<Output = Result<Appointment, ClientError>> + Send;

    fn cancel_appointment(
        &self,
        appointment_id: &str,
        reason: Option<&str>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn complete_appointment(
        &self,
        appointment_id: &str,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn check_peak_hours(
        &self,
        hospital_id: &str,
        date: NaiveDate,
    ) -> impl Future<Output = Result<PeakHourCheck, ClientError>> + Send;
}

/// The list endpoint answers with either a bare array or a wrapper object.
#[derive(Deserialize)]
#[serde(untagged)]
enum AppointmentList {
    Bare(Vec<Appointment>),
    Wrapped { appointments: Vec<Appointment> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CreatedAppointment {
    Wrapped { appointment: Appointment },
    Bare(Appointment),
}

/// reqwest-backed [`QueueApi`].
pub struct HttpQueueApi {
    base_url: String,
    client: reqwest::Client,
    auth_header: HeaderName,
    token: Option<String>,
    timeout_secs: u64,
}

impl HttpQueueApi {
    pub fn new(config: &ClientConfig, token: Option<String>) -> Result<Self, ClientError> {
        let auth_header = HeaderName::from_bytes(config.auth_header.as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid auth header name: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
            auth_header,
            token,
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(self.auth_header.clone(), token.as_str()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = self.send(builder).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

impl QueueApi for HttpQueueApi {
    async fn list_appointments(&self) -> Result<Vec<Appointment>, ClientError> {
        let list: AppointmentList = self
            .send_json(self.request(Method::GET, "/appointments/my"))
            .await?;
        Ok(match list {
            AppointmentList::Bare(appointments) => appointments,
            AppointmentList::Wrapped { appointments } => appointments,
        })
    }

    async fn live_queue(&self, appointment_id: &str) -> Result<LiveQueueSnapshot, ClientError> {
        let path = format!("/appointments/{appointment_id}/live-queue");
        self.send_json(self.request(Method::GET, &path)).await
    }

    async fn book_appointment(&self, request: &BookingRequest) -> Result<Appointment, ClientError> {
        let created: CreatedAppointment = self
            .send_json(self.request(Method::POST, "/appointments").json(request))
            .await?;
        let appointment = match created {
            CreatedAppointment::Wrapped { appointment } => appointment,
            CreatedAppointment::Bare(appointment) => appointment,
        };
        tracing::info!(appointment_id = %appointment.id, "Appointment booked");
        Ok(appointment)
    }

    async fn cancel_appointment(
        &self,
        appointment_id: &str,
        reason: Option<&str>,
    ) -> Result<(), ClientError> {
        let path = format!("/appointments/{appointment_id}/cancel");
        let body = serde_json::json!({ "reason": reason });
        self.send(self.request(Method::PUT, &path).json(&body)).await?;
        tracing::info!(appointment_id, "Appointment cancelled");
        Ok(())
    }

    async fn complete_appointment(&self, appointment_id: &str) -> Result<(), ClientError> {
        let path = format!("/appointments/{appointment_id}/complete");
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }

    async fn check_peak_hours(
        &self,
        hospital_id: &str,
        date: NaiveDate,
    ) -> Result<PeakHourCheck, ClientError> {
        let date = date.format("%Y-%m-%d").to_string();
        let builder = self
            .request(Method::GET, "/appointments/peak-hours")
            .query(&[("hospitalId", hospital_id), ("date", date.as_str())]);
        self.send_json(builder).await
    }
}
