use std::sync::Arc;

use tracing::{info, warn};
use ulid::Ulid;

use crate::contract::{ContractRenderer, ContractSnapshot};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::{Attachment, Mail, Notifier};
use crate::payment::PaymentGateway;

/// Result of creating a reservation or retrying its payment.
#[derive(Debug, Clone)]
pub struct ReservationReceipt {
    pub reservation: Reservation,
    /// Hosted payment page for online reservations.
    pub redirect_to: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum ContractOccasion {
    Created,
    PaymentConfirmed,
}

impl ContractOccasion {
    fn subject(&self) -> &'static str {
        match self {
            ContractOccasion::Created => "Votre Contrat de Location",
            ContractOccasion::PaymentConfirmed => {
                "Confirmation de Paiement - Votre Contrat de Location"
            }
        }
    }

    fn body(&self, first_name: &str) -> String {
        match self {
            ContractOccasion::Created => format!(
                "Bonjour {first_name},\n\nVeuillez trouver ci-joint votre contrat de location.\n\nCordialement,\nL'équipe de location"
            ),
            ContractOccasion::PaymentConfirmed => format!(
                "Bonjour {first_name},\n\nNous vous confirmons que votre paiement a été effectué avec succès. Veuillez trouver ci-joint votre contrat de location.\n\nCordialement,\nL'équipe de location"
            ),
        }
    }
}

/// Reservation flows that reach past the engine: payment registration,
/// gateway callbacks, and contract delivery. Collaborators are injected.
pub struct BookingService {
    engine: Arc<Engine>,
    gateway: Arc<dyn PaymentGateway>,
    renderer: Arc<dyn ContractRenderer>,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
    pub fn new(
        engine: Arc<Engine>,
        gateway: Arc<dyn PaymentGateway>,
        renderer: Arc<dyn ContractRenderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            gateway,
            renderer,
            notifier,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Online: registers the up-front amount with the gateway. A gateway
    /// failure is returned, but the reservation stays committed.
    /// Onsite: mails the contract, best-effort.
    pub async fn create_reservation(
        &self,
        draft: ReservationDraft,
        plate: Option<&str>,
    ) -> Result<ReservationReceipt, EngineError> {
        let reservation = self.engine.create_reservation(draft, plate).await?;
        info!(
            id = %reservation.id,
            payment = reservation.payment.kind.as_str(),
            "reservation created"
        );
        match reservation.payment.kind {
            PaymentType::Online => self.start_gateway_payment(reservation.id).await,
            PaymentType::Onsite => {
                self.send_contract(&reservation, ContractOccasion::Created).await;
                Ok(ReservationReceipt {
                    reservation,
                    redirect_to: None,
                })
            }
        }
    }

    pub async fn assign(&self, reservation_id: Ulid, plate: &str) -> Result<Reservation, EngineError> {
        self.engine.assign(reservation_id, plate).await
    }

    pub async fn auto_assign(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        self.engine.auto_assign(reservation_id).await
    }

    /// Gateway success callback. `order_ref` is the reservation id.
    pub async fn payment_succeeded(&self, order_ref: Ulid) -> Result<Reservation, EngineError> {
        let reservation = self.engine.record_payment_success(order_ref).await?;
        info!(
            id = %order_ref,
            status = reservation.payment.status.as_str(),
            paid = reservation.payment.paid_amount,
            "payment settled"
        );
        self.send_contract(&reservation, ContractOccasion::PaymentConfirmed)
            .await;
        Ok(reservation)
    }

    /// Gateway failure callback.
    pub async fn payment_failed(&self, order_ref: Ulid) -> Result<Reservation, EngineError> {
        let reservation = self.engine.record_payment_failure(order_ref).await?;
        warn!(id = %order_ref, "payment failed");
        Ok(reservation)
    }

    /// New gateway order for the outstanding amount.
    pub async fn retry_payment(&self, reservation_id: Ulid) -> Result<ReservationReceipt, EngineError> {
        self.start_gateway_payment(reservation_id).await
    }

    async fn start_gateway_payment(&self, reservation_id: Ulid) -> Result<ReservationReceipt, EngineError> {
        let (reservation, amount) = self.engine.begin_payment(reservation_id).await?;
        let url = self
            .gateway
            .register_payment(amount, &reservation_id.to_string())
            .await?;
        Ok(ReservationReceipt {
            reservation,
            redirect_to: Some(url),
        })
    }

    /// Render and mail the contract. Failures are logged, never returned.
    async fn send_contract(&self, reservation: &Reservation, occasion: ContractOccasion) {
        if let Err(e) = self.try_send_contract(reservation, occasion).await {
            warn!(id = %reservation.id, "contract delivery failed: {e}");
        }
    }

    async fn try_send_contract(
        &self,
        reservation: &Reservation,
        occasion: ContractOccasion,
    ) -> Result<(), EngineError> {
        let vehicle_type = self
            .engine
            .get_vehicle_type(reservation.vehicle_type_id)
            .await?;
        let snapshot = ContractSnapshot {
            reservation: reservation.clone(),
            vehicle_title: vehicle_type.profile.title,
            guarantee: vehicle_type.profile.guarantee,
        };
        let (filename, content) = self.renderer.render(&snapshot).await?;
        self.notifier
            .send(Mail {
                to: reservation.customer.email.clone(),
                subject: occasion.subject().into(),
                body: occasion.body(&reservation.customer.first_name),
                attachments: vec![Attachment { filename, content }],
            })
            .await
    }
}
