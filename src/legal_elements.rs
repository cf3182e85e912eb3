//! Legal element frameworks by area.
//!
//! Each framework lists the elements that typically must be made out for
//! a claim, defence or application under Australian law, with the
//! evidence that usually proves them. Simplified and educational: the
//! elements mapping stage uses them as a checklist, not as legal advice.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ElementDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub typical_evidence: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ElementFramework {
    pub area: &'static str,
    pub sub_category: &'static str,
    pub claim_type: &'static str,
    pub elements: &'static [ElementDefinition],
    pub relevant_legislation: &'static [&'static str],
    pub key_defences: &'static [&'static str],
}

const fn el(
    name: &'static str,
    description: &'static str,
    typical_evidence: &'static [&'static str],
) -> ElementDefinition {
    ElementDefinition {
        name,
        description,
        typical_evidence,
    }
}

pub const TENANCY_BOND_REFUND: ElementFramework = ElementFramework {
    area: "tenancy",
    sub_category: "bond_refund",
    claim_type: "Bond refund claim",
    elements: &[
        el("Valid tenancy agreement", "A valid residential tenancy agreement existed", &["Lease", "Bond lodgement receipt"]),
        el("Bond paid", "Bond was paid to the landlord, agent or bond authority", &["Payment receipt", "Bond authority statement"]),
        el("Tenancy ended", "The tenancy has properly concluded", &["Notice to vacate", "Keys returned receipt"]),
        el("Property condition", "Property returned in reasonable condition, allowing fair wear and tear", &["Entry condition report", "Exit condition report", "Photos"]),
        el("No outstanding rent or costs", "Rent and agreed costs are paid, or deductions are legitimate", &["Rent receipts", "Final rent statement"]),
    ],
    relevant_legislation: &[
        "Residential Tenancies Act 2010 (NSW)",
        "Residential Tenancies and Rooming Accommodation Act 2008 (Qld)",
        "Residential Tenancies Act 1997 (Vic)",
    ],
    key_defences: &[
        "Damage beyond fair wear and tear",
        "Outstanding rent or utilities",
        "Cleaning beyond a reasonable standard",
    ],
};

pub const TENANCY_EVICTION: ElementFramework = ElementFramework {
    area: "tenancy",
    sub_category: "eviction_notice",
    claim_type: "Challenge to eviction notice",
    elements: &[
        el("Valid notice", "Notice was served correctly with the required information", &["Copy of notice", "Proof of service"]),
        el("Correct notice period", "The required notice period was given", &["Notice date", "Tenancy type (fixed or periodic)"]),
        el("Valid grounds", "The landlord has lawful grounds for ending the tenancy", &["Stated reason on notice", "Evidence of alleged breach"]),
        el("Procedural compliance", "Proper procedure followed, with no self-help eviction", &["Communication records", "Tribunal orders"]),
    ],
    relevant_legislation: &[
        "Residential Tenancies Act 2010 (NSW)",
        "Residential Tenancies and Rooming Accommodation Act 2008 (Qld)",
    ],
    key_defences: &[
        "Valid grounds exist",
        "Proper notice period given",
        "Tenant breach of agreement",
        "End of fixed term",
    ],
};

pub const TENANCY_REPAIRS: ElementFramework = ElementFramework {
    area: "tenancy",
    sub_category: "repairs_maintenance",
    claim_type: "Repairs and maintenance claim",
    elements: &[
        el("Landlord obligation", "The repair falls within the landlord's obligations", &["Nature of repair", "Lease terms"]),
        el("Proper notification", "The tenant notified the landlord of the problem", &["Written request", "Emails or texts"]),
        el("Reasonable time elapsed", "The landlord had a reasonable time to act, given urgency", &["Timeline of communications"]),
        el("Failure to repair", "The landlord has not made the repair", &["Photos", "Inspection records"]),
    ],
    relevant_legislation: &[
        "Residential Tenancies Act 2010 (NSW) s 63-64",
        "Residential Tenancies and Rooming Accommodation Act 2008 (Qld) s 185",
    ],
    key_defences: &[
        "Damage caused by tenant",
        "Insufficient notice",
        "Access denied by tenant",
    ],
};

pub const EMPLOYMENT_UNFAIR_DISMISSAL: ElementFramework = ElementFramework {
    area: "employment",
    sub_category: "unfair_dismissal",
    claim_type: "Unfair dismissal claim",
    elements: &[
        el("Employment relationship", "An employment relationship existed, not a contracting one", &["Employment contract", "Payslips"]),
        el("Minimum employment period", "Employed for 6 months, or 12 months for a small business", &["Start date", "Termination date"]),
        el("Dismissal occurred", "Employment ended at the employer's initiative", &["Termination letter", "Communication records"]),
        el("Harsh, unjust or unreasonable", "The dismissal was harsh, unjust or unreasonable", &["Reason given", "Warnings received"]),
        el("Procedural fairness", "The employee had an opportunity to respond", &["Show cause letters", "Meeting records"]),
    ],
    relevant_legislation: &["Fair Work Act 2009 (Cth) Part 3-2"],
    key_defences: &[
        "Genuine redundancy",
        "Small Business Fair Dismissal Code compliance",
        "Valid reason for dismissal",
        "Serious misconduct",
    ],
};

pub const EMPLOYMENT_UNDERPAYMENT: ElementFramework = ElementFramework {
    area: "employment",
    sub_category: "underpayment",
    claim_type: "Underpayment claim",
    elements: &[
        el("Employment relationship", "An employment relationship existed", &["Contract", "Payslips"]),
        el("Applicable instrument", "An award, agreement or minimum wage applies", &["Award coverage", "Enterprise agreement"]),
        el("Work performed", "The work was performed as claimed", &["Timesheets", "Rosters"]),
        el("Underpayment amount", "Pay received was below the legal entitlement", &["Payslips", "Bank statements", "Award rates"]),
    ],
    relevant_legislation: &["Fair Work Act 2009 (Cth)", "National Employment Standards"],
    key_defences: &[
        "Correct classification and payment",
        "Claim out of time (6 years)",
        "Contractor, not employee",
    ],
};

pub const FAMILY_DOMESTIC_VIOLENCE_ORDER: ElementFramework = ElementFramework {
    area: "family",
    sub_category: "domestic_violence_order",
    claim_type: "Application for an AVO or DVO",
    elements: &[
        el("Relevant relationship", "A domestic relationship exists or existed", &["Relationship history", "Cohabitation evidence"]),
        el("Domestic violence", "Domestic violence has occurred", &["Incident reports", "Medical records", "Photos"]),
        el("Fear of future violence", "The applicant fears further violence", &["Threats made", "Pattern of behaviour"]),
        el("Protection needed", "An order is necessary for protection", &["Living situation", "Children involved"]),
    ],
    relevant_legislation: &[
        "Crimes (Domestic and Personal Violence) Act 2007 (NSW)",
        "Domestic and Family Violence Protection Act 2012 (Qld)",
    ],
    key_defences: &[
        "No domestic relationship",
        "Conduct did not occur",
        "Fear not reasonably held",
    ],
};

pub const FAMILY_CHILD_CUSTODY: ElementFramework = ElementFramework {
    area: "family",
    sub_category: "child_custody",
    claim_type: "Parenting orders",
    elements: &[
        el("Child's best interests", "The arrangement serves the child's best interests", &["Current arrangements", "Each parent's circumstances"]),
        el("Meaningful relationship", "The child benefits from a relationship with both parents", &["Involvement in child's life"]),
        el("Protection from harm", "The child is protected from harm, abuse or family violence", &["Safety concerns", "Family violence history"]),
        el("Practical considerations", "The arrangement is practical and workable", &["Proximity of homes", "School arrangements"]),
    ],
    relevant_legislation: &["Family Law Act 1975 (Cth) Part VII"],
    key_defences: &[
        "Safety concerns about the other parent",
        "Child's expressed wishes",
        "History of non-compliance with orders",
    ],
};

pub const CONSUMER_REFUND: ElementFramework = ElementFramework {
    area: "consumer",
    sub_category: "refund",
    claim_type: "Consumer guarantee refund claim",
    elements: &[
        el("Consumer transaction", "The purchase was a consumer transaction", &["Receipt", "Invoice"]),
        el("Consumer guarantee breach", "The goods or services failed a consumer guarantee", &["Nature of defect", "Photos"]),
        el("Major failure", "The failure is major, or there are multiple minor failures", &["Impact on use", "Repeated failures"]),
        el("Timeframe", "The claim was made within a reasonable time", &["Purchase date", "Communication timeline"]),
    ],
    relevant_legislation: &["Australian Consumer Law (Competition and Consumer Act 2010 (Cth) Sch 2)"],
    key_defences: &[
        "Not a consumer transaction",
        "Damage caused by consumer",
        "Defect disclosed before purchase",
    ],
};

pub const CRIMINAL_ASSAULT: ElementFramework = ElementFramework {
    area: "criminal",
    sub_category: "assault",
    claim_type: "Assault charge (prosecution must prove)",
    elements: &[
        el("Physical contact or threat", "Contact was made or fear of immediate violence caused", &["Victim statement", "Medical evidence", "CCTV"]),
        el("Intentional or reckless", "The act was intentional or reckless", &["Circumstances of incident"]),
        el("Without consent", "The contact was without consent", &["Victim statement"]),
        el("Without lawful excuse", "No lawful excuse such as self-defence applied", &["Who initiated", "Proportionality"]),
    ],
    relevant_legislation: &[
        "Crimes Act 1900 (NSW) s 61",
        "Criminal Code Act 1899 (Qld) s 335",
    ],
    key_defences: &["Self-defence", "Consent", "Accident"],
};

/// `area/sub_category` keys, including aliases.
static FRAMEWORKS: &[(&str, &ElementFramework)] = &[
    ("tenancy/bond_refund", &TENANCY_BOND_REFUND),
    ("tenancy/bond_dispute", &TENANCY_BOND_REFUND),
    ("tenancy/eviction_notice", &TENANCY_EVICTION),
    ("tenancy/eviction", &TENANCY_EVICTION),
    ("tenancy/repairs_maintenance", &TENANCY_REPAIRS),
    ("tenancy/repairs", &TENANCY_REPAIRS),
    ("employment/unfair_dismissal", &EMPLOYMENT_UNFAIR_DISMISSAL),
    ("employment/unfair_termination", &EMPLOYMENT_UNFAIR_DISMISSAL),
    ("employment/underpayment", &EMPLOYMENT_UNDERPAYMENT),
    ("employment/wages", &EMPLOYMENT_UNDERPAYMENT),
    ("employment/wage_theft", &EMPLOYMENT_UNDERPAYMENT),
    ("family/domestic_violence_order", &FAMILY_DOMESTIC_VIOLENCE_ORDER),
    ("family/domestic_violence", &FAMILY_DOMESTIC_VIOLENCE_ORDER),
    ("family/dvo", &FAMILY_DOMESTIC_VIOLENCE_ORDER),
    ("family/avo", &FAMILY_DOMESTIC_VIOLENCE_ORDER),
    ("family/child_custody", &FAMILY_CHILD_CUSTODY),
    ("family/custody", &FAMILY_CHILD_CUSTODY),
    ("family/parenting", &FAMILY_CHILD_CUSTODY),
    ("consumer/refund", &CONSUMER_REFUND),
    ("consumer/consumer_guarantee", &CONSUMER_REFUND),
    ("contract/refund", &CONSUMER_REFUND),
    ("criminal/assault", &CRIMINAL_ASSAULT),
];

pub fn framework_for(area: &str, sub_category: &str) -> Option<&'static ElementFramework> {
    let key = format!("{}/{}", area, sub_category);
    FRAMEWORKS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, f)| *f)
}

pub fn framework_keys() -> impl Iterator<Item = &'static str> {
    FRAMEWORKS.iter().map(|(k, _)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolves_to_canonical() {
        let f = framework_for("tenancy", "bond_dispute").unwrap();
        assert_eq!(f.sub_category, "bond_refund");
        assert_eq!(f.elements.len(), 5);
        assert_eq!(framework_for("family", "avo").unwrap().sub_category, "domestic_violence_order");
    }

    #[test]
    fn test_unknown_key() {
        assert!(framework_for("tenancy", "pets").is_none());
    }

    #[test]
    fn test_every_framework_has_elements() {
        for key in framework_keys() {
            let (area, sub) = key.split_once('/').unwrap();
            let f = framework_for(area, sub).unwrap();
            assert!(!f.elements.is_empty(), "{}", key);
            assert!(!f.relevant_legislation.is_empty(), "{}", key);
        }
    }
}
