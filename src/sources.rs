//! Fixed source catalogs for the two indexed corpora.

/// Shared logical name of the regulatory rules index.
pub const RULES_INDEX: &str = "puct_rules";

/// Shared logical name of the program-context index.
pub const CONTEXT_INDEX: &str = "centerpoint_context";

/// A regulatory rule published as a PDF.
#[derive(Debug, Clone, Copy)]
pub struct RuleSource {
    /// Stable document identifier.
    pub doc_id: &'static str,
    /// Rule section number (e.g. `25.181`).
    pub rule_id: &'static str,
    /// Human-facing rule title.
    pub title: &'static str,
    /// Where the PDF is published.
    pub url: &'static str,
}

/// A curated non-regulatory program page.
#[derive(Debug, Clone, Copy)]
pub struct ContextSource {
    /// Stable document identifier.
    pub doc_id: &'static str,
    /// Human-facing page title.
    pub title: &'static str,
    /// Where the page is published.
    pub url: &'static str,
}

/// The PUCT energy-efficiency rules indexed as the authoritative corpus.
pub const PUCT_RULES: &[RuleSource] = &[
    RuleSource {
        doc_id: "puct_25_181",
        rule_id: "25.181",
        title: "Energy Efficiency Goal",
        url: "https://ftp.puc.texas.gov/public/puct-info/agency/rulesnlaws/subrules/electric/25.181/25.181.pdf",
    },
    RuleSource {
        doc_id: "puct_25_182",
        rule_id: "25.182",
        title: "Energy Efficiency Cost Recovery Factor",
        url: "https://ftp.puc.texas.gov/public/puct-info/agency/rulesnlaws/subrules/electric/25.182/25.182.pdf",
    },
    RuleSource {
        doc_id: "puct_25_183",
        rule_id: "25.183",
        title: "Reporting and Evaluation of Energy Efficiency Programs",
        url: "https://ftp.puc.texas.gov/public/puct-info/agency/rulesnlaws/subrules/electric/25.183/25.183.pdf",
    },
];

/// CenterPoint program pages indexed as non-regulatory context.
pub const CONTEXT_PAGES: &[ContextSource] = &[
    ContextSource {
        doc_id: "cp_res_ee",
        title: "CenterPoint Residential Electric Efficiency Programs",
        url: "https://www.centerpointenergy.com/en-us/residential/save-energy-money/electric-efficiency-programs/residential-electric-efficiency",
    },
    ContextSource {
        doc_id: "cp_res_sop",
        title: "CenterPoint Residential Standard Offer Program",
        url: "https://www.centerpointenergy.com/en-us/SaveEnergyandMoney/Pages/residential-standard-offer-program.aspx",
    },
    ContextSource {
        doc_id: "cp_ci_sop",
        title: "CenterPoint Commercial & Industrial Standard Offer Program",
        url: "https://www.centerpointenergy.com/en-us/SaveEnergyandMoney/Pages/commercial-industrial-standard-offer-program.aspx",
    },
    ContextSource {
        doc_id: "cp_bus_ee",
        title: "CenterPoint Business Efficiency Programs",
        url: "https://www.centerpointenergy.com/en-us/business/save-energy-money/electric-efficiency-programs/business-efficiency-programs",
    },
];
