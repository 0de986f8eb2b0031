use std::fmt::Write as _;

use async_trait::async_trait;

use crate::engine::EngineError;
use crate::model::*;
use crate::time::ms_to_rfc3339;

/// Everything a rental contract shows, captured at render time.
#[derive(Debug, Clone)]
pub struct ContractSnapshot {
    pub reservation: Reservation,
    pub vehicle_title: String,
    pub guarantee: Millimes,
}

#[async_trait]
pub trait ContractRenderer: Send + Sync {
    /// File name and body of the rendered document.
    async fn render(&self, snapshot: &ContractSnapshot) -> Result<(String, Vec<u8>), EngineError>;
}

/// `1234500` millimes → `1234.500 DT`.
pub fn format_money(amount: Millimes) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:03} DT", abs / 1000, abs % 1000)
}

fn category_label(kind: CategoryKind) -> &'static str {
    match kind {
        CategoryKind::LongTerm => "Longue Durée",
        CategoryKind::ShortTerm => "Courte Durée",
    }
}

fn payment_status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Paid => "Payé",
        PaymentStatus::PartiallyPaid => "Partiellement payé",
        PaymentStatus::Pending => "En attente",
        PaymentStatus::Failed => "Échoué",
    }
}

/// UTF-8 text contract.
pub struct PlainTextContract;

impl PlainTextContract {
    pub fn render_text(snapshot: &ContractSnapshot) -> String {
        let r = &snapshot.reservation;
        let c = &r.customer;
        let mut out = String::new();
        let _ = writeln!(out, "CONTRAT DE LOCATION");
        let _ = writeln!(out, "Référence: {}", r.id);
        let _ = writeln!(out);

        let _ = writeln!(out, "INFORMATIONS CLIENT:");
        let _ = writeln!(out, "  Nom Complet: {} {}", c.first_name, c.last_name);
        let _ = writeln!(out, "  Email: {}", c.email);
        let _ = writeln!(out, "  Téléphone: {}", c.phone);
        let _ = writeln!(out, "  WhatsApp: {}", c.whatsapp);
        let _ = writeln!(out, "  Adresse: {}", c.address);
        let _ = writeln!(out, "  Ville: {}", c.city);
        let _ = writeln!(out, "  Âge: {}", c.age);
        let _ = writeln!(out);

        let _ = writeln!(out, "DÉTAILS DU VÉHICULE:");
        let _ = writeln!(out, "  Véhicule: {}", snapshot.vehicle_title);
        let _ = writeln!(out, "  Catégorie: {}", category_label(r.category));
        let _ = writeln!(out, "  Lieu de Départ: {}", r.pickup_location);
        let _ = writeln!(out, "  Lieu de Retour: {}", r.dropoff_location);
        let _ = writeln!(out, "  Date de Départ: {}", ms_to_rfc3339(r.span.start));
        let _ = writeln!(out, "  Date de Retour: {}", ms_to_rfc3339(r.span.end));
        let _ = writeln!(out, "  Siège Auto: {}", if r.child_seat { "Oui" } else { "Non" });
        let _ = writeln!(
            out,
            "  Numéro de Vol: {}",
            r.flight_number.as_deref().unwrap_or("Non spécifié")
        );
        if let Some(plate) = r.assigned_plate() {
            let _ = writeln!(out, "  Matricule: {plate}");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "DÉTAILS FINANCIERS:");
        let _ = writeln!(out, "  Prix Total: {}", format_money(r.total_price));
        let _ = writeln!(out, "  Dépôt de garantie: {}", format_money(snapshot.guarantee));
        let kind = match r.payment.kind {
            PaymentType::Online => "En ligne",
            PaymentType::Onsite => "Sur place",
        };
        let _ = writeln!(out, "  Type de paiement: {kind}");
        let _ = writeln!(
            out,
            "  Statut du paiement: {}",
            payment_status_label(r.payment.status)
        );
        if r.payment.kind == PaymentType::Online {
            let _ = writeln!(out, "  Pourcentage payé: {}%", r.payment.percentage);
        }
        if r.payment.paid_amount > 0 {
            let _ = writeln!(out, "  Montant payé: {}", format_money(r.payment.paid_amount));
        }
        out
    }
}

#[async_trait]
impl ContractRenderer for PlainTextContract {
    async fn render(&self, snapshot: &ContractSnapshot) -> Result<(String, Vec<u8>), EngineError> {
        let c = &snapshot.reservation.customer;
        let name = format!("Contrat_Location_{}_{}.txt", c.first_name, c.last_name);
        Ok((name, Self::render_text(snapshot).into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn snapshot() -> ContractSnapshot {
        ContractSnapshot {
            reservation: Reservation {
                id: Ulid::new(),
                vehicle_type_id: Ulid::new(),
                customer: Customer {
                    first_name: "Amal".into(),
                    last_name: "Ben Salah".into(),
                    email: "amal@example.com".into(),
                    ..Default::default()
                },
                category: CategoryKind::ShortTerm,
                span: Span::new(1_719_792_000_000, 1_720_051_200_000),
                total_price: 240_000,
                pickup_location: "Tunis-Carthage".into(),
                dropoff_location: "Ennozha".into(),
                child_seat: true,
                flight_number: None,
                payment: Payment::new(PaymentType::Online, 30),
                assignment: Some(Assignment {
                    unit: UnitRef {
                        vehicle_type_id: Ulid::new(),
                        plate: "123TUN456".into(),
                    },
                    assigned_at: 0,
                }),
                created_at: 0,
            },
            vehicle_title: "Clio 5".into(),
            guarantee: 500_000,
        }
    }

    #[test]
    fn money_has_three_decimals() {
        assert_eq!(format_money(80_000), "80.000 DT");
        assert_eq!(format_money(1_234_567), "1234.567 DT");
        assert_eq!(format_money(5), "0.005 DT");
    }

    #[test]
    fn contract_lists_plate_and_totals() {
        let text = PlainTextContract::render_text(&snapshot());
        assert!(text.contains("Matricule: 123TUN456"));
        assert!(text.contains("Prix Total: 240.000 DT"));
        assert!(text.contains("Courte Durée"));
        assert!(text.contains("Pourcentage payé: 30%"));
        assert!(text.contains("Non spécifié"));
        assert!(!text.contains("Montant payé"));
    }

    #[tokio::test]
    async fn file_name_uses_customer_name() {
        let (name, body) = PlainTextContract.render(&snapshot()).await.unwrap();
        assert_eq!(name, "Contrat_Location_Amal_Ben Salah.txt");
        assert!(!body.is_empty());
    }
}
