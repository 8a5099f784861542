//! Status vocabularies of cooperating systems.
//!
//! Each partner speaks its own status language. A [`PartnerVocabulary`] is a
//! static table between a local status enum and the partner's strings:
//! `to_partner` is total, `from_partner` never fails and falls back to a safe
//! review state for anything it does not recognise.

use crate::domain::{ContractStatus, DisbursementStatus};
use tracing::warn;

pub trait PartnerVocabulary {
    type Local: Copy + PartialEq + std::fmt::Debug + 'static;

    /// Used in logs.
    const NAME: &'static str;

    /// One row per local status.
    const TABLE: &'static [(Self::Local, &'static str)];

    /// Extra partner spellings, mapped to a canonical partner status.
    const ALIASES: &'static [(&'static str, &'static str)];

    /// Applied to unknown partner statuses.
    const FALLBACK: Self::Local;

    fn to_partner(local: Self::Local) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(status, _)| *status == local)
            .map(|(_, partner)| *partner)
            .unwrap_or_else(|| Self::to_partner(Self::FALLBACK))
    }

    fn from_partner(raw: &str) -> Self::Local {
        let normalized = normalize(raw);
        let canonical = Self::ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(normalized.as_str());

        match Self::TABLE.iter().find(|(_, partner)| *partner == canonical) {
            Some((status, _)) => *status,
            None => {
                warn!(
                    vocabulary = Self::NAME,
                    raw_status = %raw,
                    fallback = ?Self::FALLBACK,
                    "Unknown partner status, using fallback"
                );
                Self::FALLBACK
            }
        }
    }
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .to_uppercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Financing requests as seen by the funding partner; mirrors disbursements.
pub struct FinancingRequests;

impl PartnerVocabulary for FinancingRequests {
    type Local = DisbursementStatus;

    const NAME: &'static str = "financing_requests";

    const TABLE: &'static [(DisbursementStatus, &'static str)] = &[
        (DisbursementStatus::Draft, "SUBMITTED"),
        (DisbursementStatus::Pending, "UNDER_REVIEW"),
        (DisbursementStatus::Approved, "APPROVED"),
        (DisbursementStatus::Rejected, "REJECTED"),
        (DisbursementStatus::Processing, "DISBURSING"),
        (DisbursementStatus::Completed, "DISBURSED"),
        (DisbursementStatus::Failed, "DISBURSEMENT_FAILED"),
        (DisbursementStatus::Canceled, "CANCELLED"),
    ];

    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("IN_REVIEW", "UNDER_REVIEW"),
        ("PENDING_REVIEW", "UNDER_REVIEW"),
        ("CANCELED", "CANCELLED"),
        ("FUNDED", "DISBURSED"),
        ("PAID_OUT", "DISBURSED"),
    ];

    const FALLBACK: DisbursementStatus = DisbursementStatus::Pending;
}

/// Credit requests as seen by the origination partner; mirrors contracts.
pub struct CreditRequests;

impl PartnerVocabulary for CreditRequests {
    type Local = ContractStatus;

    const NAME: &'static str = "credit_requests";

    const TABLE: &'static [(ContractStatus, &'static str)] = &[
        (ContractStatus::Draft, "PENDING"),
        (ContractStatus::Active, "ACTIVE"),
        (ContractStatus::Suspended, "ON_HOLD"),
        (ContractStatus::Restructured, "RESTRUCTURED"),
        (ContractStatus::Litigation, "IN_RECOVERY"),
        (ContractStatus::Defaulted, "WRITTEN_OFF"),
        (ContractStatus::Completed, "REPAID"),
        (ContractStatus::Canceled, "CANCELLED"),
    ];

    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("UNDER_REVIEW", "PENDING"),
        ("CLOSED", "REPAID"),
        ("PAID_OFF", "REPAID"),
        ("SETTLED", "REPAID"),
        ("SUSPENDED", "ON_HOLD"),
        ("DEFAULTED", "WRITTEN_OFF"),
        ("LITIGATION", "IN_RECOVERY"),
        ("CANCELED", "CANCELLED"),
    ];

    // Draft is the contract-side equivalent of "under review".
    const FALLBACK: ContractStatus = ContractStatus::Draft;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_local_status_has_a_partner_status() {
        for status in [
            DisbursementStatus::Draft,
            DisbursementStatus::Pending,
            DisbursementStatus::Approved,
            DisbursementStatus::Rejected,
            DisbursementStatus::Processing,
            DisbursementStatus::Completed,
            DisbursementStatus::Failed,
            DisbursementStatus::Canceled,
        ] {
            let partner = FinancingRequests::to_partner(status);
            assert_eq!(FinancingRequests::from_partner(partner), status);
        }

        for status in [
            ContractStatus::Draft,
            ContractStatus::Active,
            ContractStatus::Suspended,
            ContractStatus::Restructured,
            ContractStatus::Litigation,
            ContractStatus::Defaulted,
            ContractStatus::Completed,
            ContractStatus::Canceled,
        ] {
            let partner = CreditRequests::to_partner(status);
            assert_eq!(CreditRequests::from_partner(partner), status);
        }
    }

    #[test]
    fn from_partner_is_case_insensitive_and_accepts_aliases() {
        assert_eq!(
            FinancingRequests::from_partner("in-review"),
            DisbursementStatus::Pending
        );
        assert_eq!(
            FinancingRequests::from_partner(" funded "),
            DisbursementStatus::Completed
        );
        assert_eq!(
            CreditRequests::from_partner("Paid Off"),
            ContractStatus::Completed
        );
        assert_eq!(
            CreditRequests::from_partner("canceled"),
            ContractStatus::Canceled
        );
    }

    #[test]
    fn unknown_partner_status_falls_back_to_review() {
        assert_eq!(
            FinancingRequests::from_partner("ESCALATED_TO_BOARD"),
            DisbursementStatus::Pending
        );
        assert_eq!(
            FinancingRequests::to_partner(FinancingRequests::from_partner("???")),
            "UNDER_REVIEW"
        );
        assert_eq!(CreditRequests::from_partner(""), ContractStatus::Draft);
    }

    #[test]
    fn contract_statuses_project_onto_credit_requests() {
        assert_eq!(CreditRequests::to_partner(ContractStatus::Completed), "REPAID");
        assert_eq!(CreditRequests::to_partner(ContractStatus::Litigation), "IN_RECOVERY");
    }
}
