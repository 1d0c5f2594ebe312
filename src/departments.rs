//! Per-department presentation profile.
//!
//! One table drives nav routes, colours, dashboard tabs and tally buckets
//! for every department so callers never branch on department strings.

use crate::policy::Department;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavRoute {
    pub label: &'static str,
    pub path: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentProfile {
    pub department: Department,
    pub office_name: &'static str,
    pub primary_color: &'static str,
    pub nav: &'static [NavRoute],
    pub dashboard_tabs: &'static [&'static str],
    pub tally_buckets: &'static [&'static str],
}

const DASHBOARD: NavRoute = NavRoute {
    label: "Dashboard",
    path: "/dashboard",
};
const OPD_RECORDS: NavRoute = NavRoute {
    label: "OPD Records",
    path: "/opd-records",
};
const GCO_RECORDS: NavRoute = NavRoute {
    label: "GCO Records",
    path: "/gco-records",
};
const INF_RECORDS: NavRoute = NavRoute {
    label: "INF Records",
    path: "/inf-records",
};
const STUDENT_DATA: NavRoute = NavRoute {
    label: "Student Data",
    path: "/student-data",
};

static OPD: DepartmentProfile = DepartmentProfile {
    department: Department::Opd,
    office_name: "Office of the Prefect of Discipline",
    primary_color: "#003A6C",
    nav: &[DASHBOARD, OPD_RECORDS, INF_RECORDS, STUDENT_DATA],
    dashboard_tabs: &["Medical Records (INF)", "Psychological Records (INF)"],
    tally_buckets: &["ALL", "MINOR", "MAJOR", "SERIOUS"],
};

static GCO: DepartmentProfile = DepartmentProfile {
    department: Department::Gco,
    office_name: "Guidance Counseling Office",
    primary_color: "#00451D",
    nav: &[DASHBOARD, GCO_RECORDS, OPD_RECORDS, INF_RECORDS, STUDENT_DATA],
    dashboard_tabs: &["Counseling Records"],
    tally_buckets: &["ALL", "TO_SCHEDULE", "SCHEDULED", "DONE"],
};

static INF: DepartmentProfile = DepartmentProfile {
    department: Department::Inf,
    office_name: "Infirmary",
    primary_color: "#640C17",
    nav: &[DASHBOARD, INF_RECORDS, GCO_RECORDS, STUDENT_DATA],
    dashboard_tabs: &["Medical Records (INF)", "Psychological Records (GCO)"],
    tally_buckets: &["MEDICAL", "PSYCHOLOGICAL", "ALL"],
};

static ADMINISTRATOR: DepartmentProfile = DepartmentProfile {
    department: Department::Administrator,
    office_name: "Administrator",
    primary_color: "#0a1a3c",
    nav: &[DASHBOARD, OPD_RECORDS, GCO_RECORDS, INF_RECORDS, STUDENT_DATA],
    dashboard_tabs: &["System Overview"],
    tally_buckets: &[],
};

pub fn profile(department: Department) -> &'static DepartmentProfile {
    match department {
        Department::Opd => &OPD,
        Department::Gco => &GCO,
        Department::Inf => &INF,
        Department::Administrator => &ADMINISTRATOR,
    }
}
