//! Country catalog: the static ISO-3166 alpha-3 lookup table.
//!
//! The catalog defines which codes are valid: a [`CountryCode`] is only
//! meaningful to the rest of the system if it appears here. The table also
//! backs the search-by-name lookup used by the UI.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::CountryCode;

/// ISO-3166 alpha-3 code to English short name.
static TABLE: &[(&str, &str)] = &[
    ("AFG", "Afghanistan"),
    ("ALB", "Albania"),
    ("DZA", "Algeria"),
    ("AND", "Andorra"),
    ("AGO", "Angola"),
    ("ATG", "Antigua and Barbuda"),
    ("ARG", "Argentina"),
    ("ARM", "Armenia"),
    ("AUS", "Australia"),
    ("AUT", "Austria"),
    ("AZE", "Azerbaijan"),
    ("BHS", "Bahamas"),
    ("BHR", "Bahrain"),
    ("BGD", "Bangladesh"),
    ("BRB", "Barbados"),
    ("BLR", "Belarus"),
    ("BEL", "Belgium"),
    ("BLZ", "Belize"),
    ("BEN", "Benin"),
    ("BTN", "Bhutan"),
    ("BOL", "Bolivia"),
    ("BIH", "Bosnia and Herzegovina"),
    ("BWA", "Botswana"),
    ("BRA", "Brazil"),
    ("BRN", "Brunei"),
    ("BGR", "Bulgaria"),
    ("BFA", "Burkina Faso"),
    ("BDI", "Burundi"),
    ("CPV", "Cabo Verde"),
    ("KHM", "Cambodia"),
    ("CMR", "Cameroon"),
    ("CAN", "Canada"),
    ("CAF", "Central African Republic"),
    ("TCD", "Chad"),
    ("CHL", "Chile"),
    ("CHN", "China"),
    ("COL", "Colombia"),
    ("COM", "Comoros"),
    ("COG", "Congo"),
    ("COD", "Congo (Democratic Republic)"),
    ("CRI", "Costa Rica"),
    ("CIV", "Cote d'Ivoire"),
    ("HRV", "Croatia"),
    ("CUB", "Cuba"),
    ("CYP", "Cyprus"),
    ("CZE", "Czechia"),
    ("DNK", "Denmark"),
    ("DJI", "Djibouti"),
    ("DMA", "Dominica"),
    ("DOM", "Dominican Republic"),
    ("ECU", "Ecuador"),
    ("EGY", "Egypt"),
    ("SLV", "El Salvador"),
    ("GNQ", "Equatorial Guinea"),
    ("ERI", "Eritrea"),
    ("EST", "Estonia"),
    ("SWZ", "Eswatini"),
    ("ETH", "Ethiopia"),
    ("FJI", "Fiji"),
    ("FIN", "Finland"),
    ("FRA", "France"),
    ("GAB", "Gabon"),
    ("GMB", "Gambia"),
    ("GEO", "Georgia"),
    ("DEU", "Germany"),
    ("GHA", "Ghana"),
    ("GRC", "Greece"),
    ("GRD", "Grenada"),
    ("GTM", "Guatemala"),
    ("GIN", "Guinea"),
    ("GNB", "Guinea-Bissau"),
    ("GUY", "Guyana"),
    ("HTI", "Haiti"),
    ("HND", "Honduras"),
    ("HUN", "Hungary"),
    ("ISL", "Iceland"),
    ("IND", "India"),
    ("IDN", "Indonesia"),
    ("IRN", "Iran"),
    ("IRQ", "Iraq"),
    ("IRL", "Ireland"),
    ("ISR", "Israel"),
    ("ITA", "Italy"),
    ("JAM", "Jamaica"),
    ("JPN", "Japan"),
    ("JOR", "Jordan"),
    ("KAZ", "Kazakhstan"),
    ("KEN", "Kenya"),
    ("KIR", "Kiribati"),
    ("PRK", "Korea (North)"),
    ("KOR", "Korea (South)"),
    ("KWT", "Kuwait"),
    ("KGZ", "Kyrgyzstan"),
    ("LAO", "Laos"),
    ("LVA", "Latvia"),
    ("LBN", "Lebanon"),
    ("LSO", "Lesotho"),
    ("LBR", "Liberia"),
    ("LBY", "Libya"),
    ("LIE", "Liechtenstein"),
    ("LTU", "Lithuania"),
    ("LUX", "Luxembourg"),
    ("MDG", "Madagascar"),
    ("MWI", "Malawi"),
    ("MYS", "Malaysia"),
    ("MDV", "Maldives"),
    ("MLI", "Mali"),
    ("MLT", "Malta"),
    ("MHL", "Marshall Islands"),
    ("MRT", "Mauritania"),
    ("MUS", "Mauritius"),
    ("MEX", "Mexico"),
    ("FSM", "Micronesia"),
    ("MDA", "Moldova"),
    ("MCO", "Monaco"),
    ("MNG", "Mongolia"),
    ("MNE", "Montenegro"),
    ("MAR", "Morocco"),
    ("MOZ", "Mozambique"),
    ("MMR", "Myanmar"),
    ("NAM", "Namibia"),
    ("NRU", "Nauru"),
    ("NPL", "Nepal"),
    ("NLD", "Netherlands"),
    ("NZL", "New Zealand"),
    ("NIC", "Nicaragua"),
    ("NER", "Niger"),
    ("NGA", "Nigeria"),
    ("MKD", "North Macedonia"),
    ("NOR", "Norway"),
    ("OMN", "Oman"),
    ("PAK", "Pakistan"),
    ("PLW", "Palau"),
    ("PSE", "Palestine"),
    ("PAN", "Panama"),
    ("PNG", "Papua New Guinea"),
    ("PRY", "Paraguay"),
    ("PER", "Peru"),
    ("PHL", "Philippines"),
    ("POL", "Poland"),
    ("PRT", "Portugal"),
    ("QAT", "Qatar"),
    ("ROU", "Romania"),
    ("RUS", "Russia"),
    ("RWA", "Rwanda"),
    ("KNA", "Saint Kitts and Nevis"),
    ("LCA", "Saint Lucia"),
    ("VCT", "Saint Vincent and the Grenadines"),
    ("WSM", "Samoa"),
    ("SMR", "San Marino"),
    ("STP", "Sao Tome and Principe"),
    ("SAU", "Saudi Arabia"),
    ("SEN", "Senegal"),
    ("SRB", "Serbia"),
    ("SYC", "Seychelles"),
    ("SLE", "Sierra Leone"),
    ("SGP", "Singapore"),
    ("SVK", "Slovakia"),
    ("SVN", "Slovenia"),
    ("SLB", "Solomon Islands"),
    ("SOM", "Somalia"),
    ("ZAF", "South Africa"),
    ("SSD", "South Sudan"),
    ("ESP", "Spain"),
    ("LKA", "Sri Lanka"),
    ("SDN", "Sudan"),
    ("SUR", "Suriname"),
    ("SWE", "Sweden"),
    ("CHE", "Switzerland"),
    ("SYR", "Syria"),
    ("TWN", "Taiwan"),
    ("TJK", "Tajikistan"),
    ("TZA", "Tanzania"),
    ("THA", "Thailand"),
    ("TLS", "Timor-Leste"),
    ("TGO", "Togo"),
    ("TON", "Tonga"),
    ("TTO", "Trinidad and Tobago"),
    ("TUN", "Tunisia"),
    ("TUR", "Turkiye"),
    ("TKM", "Turkmenistan"),
    ("TUV", "Tuvalu"),
    ("UGA", "Uganda"),
    ("UKR", "Ukraine"),
    ("ARE", "United Arab Emirates"),
    ("GBR", "United Kingdom"),
    ("USA", "United States"),
    ("URY", "Uruguay"),
    ("UZB", "Uzbekistan"),
    ("VUT", "Vanuatu"),
    ("VAT", "Vatican City"),
    ("VEN", "Venezuela"),
    ("VNM", "Vietnam"),
    ("YEM", "Yemen"),
    ("ZMB", "Zambia"),
    ("ZWE", "Zimbabwe"),
    // Territories commonly shown on world maps
    ("ABW", "Aruba"),
    ("AIA", "Anguilla"),
    ("ASM", "American Samoa"),
    ("ATA", "Antarctica"),
    ("BMU", "Bermuda"),
    ("COK", "Cook Islands"),
    ("CUW", "Curacao"),
    ("CYM", "Cayman Islands"),
    ("ESH", "Western Sahara"),
    ("FLK", "Falkland Islands"),
    ("FRO", "Faroe Islands"),
    ("GIB", "Gibraltar"),
    ("GLP", "Guadeloupe"),
    ("GRL", "Greenland"),
    ("GUF", "French Guiana"),
    ("GUM", "Guam"),
    ("HKG", "Hong Kong"),
    ("IMN", "Isle of Man"),
    ("JEY", "Jersey"),
    ("GGY", "Guernsey"),
    ("KOS", "Kosovo"),
    ("MAC", "Macao"),
    ("MTQ", "Martinique"),
    ("MYT", "Mayotte"),
    ("NCL", "New Caledonia"),
    ("NIU", "Niue"),
    ("PRI", "Puerto Rico"),
    ("PYF", "French Polynesia"),
    ("REU", "Reunion"),
    ("SJM", "Svalbard and Jan Mayen"),
    ("SXM", "Sint Maarten"),
    ("TCA", "Turks and Caicos Islands"),
    ("VGB", "British Virgin Islands"),
    ("VIR", "U.S. Virgin Islands"),
    ("WLF", "Wallis and Futuna"),
];

fn index() -> &'static HashMap<&'static str, &'static str> {
    static INDEX: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    INDEX.get_or_init(|| TABLE.iter().copied().collect())
}

/// Look up the display name for a code
#[must_use]
pub fn name_of(code: CountryCode) -> Option<&'static str> {
    index().get(code.as_str()).copied()
}

/// Check whether a code denotes a catalogued country
#[must_use]
pub fn is_valid(code: CountryCode) -> bool {
    index().contains_key(code.as_str())
}

/// Number of catalogued countries
#[must_use]
pub fn len() -> usize {
    TABLE.len()
}

/// Iterate over all catalogued `(code, name)` pairs
pub fn all() -> impl Iterator<Item = (CountryCode, &'static str)> {
    TABLE
        .iter()
        .filter_map(|(code, name)| Some((code.parse().ok()?, *name)))
}

/// Search countries by name substring or exact code, case-insensitive.
///
/// Results are ordered as in the table (roughly alphabetical by name).
/// An empty query yields no results.
#[must_use]
pub fn search(query: &str) -> Vec<(CountryCode, &'static str)> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    TABLE
        .iter()
        .filter(|(code, name)| {
            name.to_lowercase().contains(&needle) || code.eq_ignore_ascii_case(&needle)
        })
        .filter_map(|(code, name)| Some((code.parse().ok()?, *name)))
        .collect()
}
