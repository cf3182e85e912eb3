//! Crisis resource bundles.
//!
//! Each risk category maps to a fixed list of Australian support services.
//! State-specific lines are added when the user's jurisdiction is known and
//! a dedicated service exists; national services are always included.

use serde::{Deserialize, Serialize};

use auslaw_core::models::Jurisdiction;

/// Risk categories the safety gate can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Criminal,
    FamilyViolence,
    UrgentDeadline,
    ChildWelfare,
    SuicideSelfHarm,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        RiskCategory::SuicideSelfHarm,
        RiskCategory::FamilyViolence,
        RiskCategory::ChildWelfare,
        RiskCategory::Criminal,
        RiskCategory::UrgentDeadline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Criminal => "criminal",
            RiskCategory::FamilyViolence => "family_violence",
            RiskCategory::UrgentDeadline => "urgent_deadline",
            RiskCategory::ChildWelfare => "child_welfare",
            RiskCategory::SuicideSelfHarm => "suicide_self_harm",
        }
    }

    pub fn parse(s: &str) -> Option<RiskCategory> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisResource {
    pub name: String,
    pub hotline: String,
    pub description: String,
    pub url: Option<String>,
    /// `"National"` or a state/territory code.
    pub jurisdiction_scope: String,
}

fn national(name: &str, hotline: &str, description: &str, url: Option<&str>) -> CrisisResource {
    CrisisResource {
        name: name.to_string(),
        hotline: hotline.to_string(),
        description: description.to_string(),
        url: url.map(str::to_string),
        jurisdiction_scope: "National".to_string(),
    }
}

fn state(
    j: Jurisdiction,
    name: &str,
    hotline: &str,
    description: &str,
    url: Option<&str>,
) -> CrisisResource {
    CrisisResource {
        jurisdiction_scope: j.as_str().to_string(),
        ..national(name, hotline, description, url)
    }
}

fn emergency() -> CrisisResource {
    national(
        "Emergency Services",
        "000",
        "Police, ambulance or fire if anyone is in immediate danger",
        None,
    )
}

fn legal_aid_line(jurisdiction: Option<Jurisdiction>) -> CrisisResource {
    match jurisdiction {
        Some(Jurisdiction::Nsw) => state(
            Jurisdiction::Nsw,
            "LawAccess NSW",
            "1300 888 529",
            "Free legal information and referral, including Legal Aid NSW",
            Some("https://www.legalaid.nsw.gov.au"),
        ),
        Some(Jurisdiction::Qld) => state(
            Jurisdiction::Qld,
            "Legal Aid Queensland",
            "1300 65 11 88",
            "Free legal information and help with criminal and civil matters",
            Some("https://www.legalaid.qld.gov.au"),
        ),
        Some(Jurisdiction::Vic) => state(
            Jurisdiction::Vic,
            "Victoria Legal Aid",
            "1300 792 387",
            "Free legal help, including duty lawyers at court",
            Some("https://www.legalaid.vic.gov.au"),
        ),
        _ => national(
            "National Legal Aid",
            "See website for your state's Legal Aid line",
            "Directory of Legal Aid commissions in every state and territory",
            Some("https://www.nationallegalaid.org"),
        ),
    }
}

/// Support services for `category`, with state lines for `jurisdiction`
/// where one exists. Never empty.
pub fn resources_for(category: RiskCategory, jurisdiction: Option<Jurisdiction>) -> Vec<CrisisResource> {
    let mut out = Vec::new();
    match category {
        RiskCategory::SuicideSelfHarm => {
            out.push(national(
                "Lifeline",
                "13 11 14",
                "24/7 crisis support and suicide prevention",
                Some("https://www.lifeline.org.au"),
            ));
            out.push(national(
                "Suicide Call Back Service",
                "1300 659 467",
                "24/7 phone and online counselling",
                Some("https://www.suicidecallbackservice.org.au"),
            ));
            out.push(emergency());
        }
        RiskCategory::FamilyViolence => {
            out.push(national(
                "1800RESPECT",
                "1800 737 732",
                "24/7 national domestic, family and sexual violence counselling",
                Some("https://www.1800respect.org.au"),
            ));
            match jurisdiction {
                Some(Jurisdiction::Nsw) => out.push(state(
                    Jurisdiction::Nsw,
                    "NSW Domestic Violence Line",
                    "1800 656 463",
                    "24/7 crisis counselling and referrals in NSW",
                    None,
                )),
                Some(Jurisdiction::Vic) => out.push(state(
                    Jurisdiction::Vic,
                    "Safe Steps",
                    "1800 015 188",
                    "24/7 family violence response centre for Victoria",
                    Some("https://www.safesteps.org.au"),
                )),
                Some(Jurisdiction::Qld) => out.push(state(
                    Jurisdiction::Qld,
                    "DVConnect Womensline",
                    "1800 811 811",
                    "24/7 domestic violence support in Queensland",
                    Some("https://www.dvconnect.org"),
                )),
                _ => {}
            }
            out.push(emergency());
        }
        RiskCategory::ChildWelfare => {
            match jurisdiction {
                Some(Jurisdiction::Nsw) => out.push(state(
                    Jurisdiction::Nsw,
                    "NSW Child Protection Helpline",
                    "132 111",
                    "Report a child at risk of significant harm",
                    None,
                )),
                Some(Jurisdiction::Qld) => out.push(state(
                    Jurisdiction::Qld,
                    "Child Safety After Hours",
                    "1800 177 135",
                    "Queensland child safety reports outside business hours",
                    None,
                )),
                _ => {}
            }
            out.push(national(
                "Kids Helpline",
                "1800 55 1800",
                "24/7 counselling for children and young people",
                Some("https://kidshelpline.com.au"),
            ));
            out.push(emergency());
        }
        RiskCategory::Criminal => {
            out.push(legal_aid_line(jurisdiction));
            out.push(national(
                "Community Legal Centres Australia",
                "See website for your nearest centre",
                "Free local legal advice services",
                Some("https://clcs.org.au"),
            ));
        }
        RiskCategory::UrgentDeadline => {
            out.push(legal_aid_line(jurisdiction));
            out.push(national(
                "Community Legal Centres Australia",
                "See website for your nearest centre",
                "Free advice, often available at short notice before a hearing",
                Some("https://clcs.org.au"),
            ));
        }
    }
    out
}

/// Fixed reply shown on the escalation path.
pub fn escalation_message(resources: &[CrisisResource]) -> String {
    let lines: Vec<String> = resources
        .iter()
        .map(|r| {
            let mut line = format!("**{}** - {}", r.name, r.hotline);
            line.push_str(&format!("\n  _{}_", r.description));
            if let Some(url) = &r.url {
                line.push_str(&format!("\n  {}", url));
            }
            line
        })
        .collect();

    format!(
        "I'm concerned about what you've told me, and your safety matters most right now.\n\n\
         **Please reach out to one of these services:**\n\n{}\n\n---\n\n\
         These services are free and confidential, and the people there are trained to help \
         with exactly this kind of situation. When you're ready, I can still help with \
         general legal information.",
        lines.join("\n\n")
    )
}
