use reqwest::Url;

use super::ServiceError;
use crate::models::referrals::Invite;

const WHATSAPP_SHARE: &str = "https://wa.me/";
const SMS_SHARE: &str = "sms:";

fn invalid_url(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Internal(format!("Invalid public url: {}", e))
}

/// Query parameter carrying the referrer on the application URL.
pub const REFERRAL_PARAM: &str = "ref";

/// Application URL that records `username` as referrer when a visitor
/// follows it.
pub fn referral_url(public_url: &str, username: &str) -> Result<Url, ServiceError> {
    let mut url = Url::parse(public_url).map_err(invalid_url)?;
    url.path_segments_mut()
        .map_err(|_| invalid_url(public_url))?
        .pop_if_empty()
        .push("");
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut().append_pair(REFERRAL_PARAM, username);

    Ok(url)
}

pub fn invite_message(referral_url: &Url) -> String {
    format!(
        "I'm earning rewards by answering short surveys. Join me with my link: {}",
        referral_url
    )
}

/// Referral link plus ready-made share intents for the session user.
pub fn build_invite(public_url: &str, username: &str) -> Result<Invite, ServiceError> {
    let url = referral_url(public_url, username)?;
    let message = invite_message(&url);

    let whatsapp =
        Url::parse_with_params(WHATSAPP_SHARE, &[("text", message.as_str())]).map_err(invalid_url)?;
    let sms = Url::parse_with_params(SMS_SHARE, &[("body", message.as_str())]).map_err(invalid_url)?;

    Ok(Invite {
        referral_code: username.to_string(),
        referral_url: url.to_string(),
        message,
        whatsapp_url: whatsapp.to_string(),
        sms_url: sms.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_url_carries_code_as_query() {
        let url = referral_url("http://localhost:8080", "alice").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/?ref=alice");

        let url = referral_url("https://rewards.example.com/app", "bob_2").unwrap();
        assert_eq!(url.as_str(), "https://rewards.example.com/app/?ref=bob_2");

        let url = referral_url("https://rewards.example.com/app/?utm=x#top", "carol").unwrap();
        assert_eq!(url.as_str(), "https://rewards.example.com/app/?ref=carol");
    }

    #[test]
    fn invite_links_are_encoded() {
        let invite = build_invite("http://localhost:8080", "alice").unwrap();

        assert_eq!(invite.referral_code, "alice");
        assert!(invite.message.contains("http://localhost:8080/?ref=alice"));
        assert!(invite.whatsapp_url.starts_with("https://wa.me/?text="));
        assert!(invite.sms_url.starts_with("sms:?body="));
        assert!(!invite.whatsapp_url.contains(' '));
        assert!(invite
            .whatsapp_url
            .contains("http%3A%2F%2Flocalhost%3A8080%2F%3Fref%3Dalice"));

        let parsed = Url::parse(&invite.sms_url).unwrap();
        let body = parsed
            .query_pairs()
            .find(|(key, _)| key == "body")
            .map(|(_, value)| value.into_owned());
        assert_eq!(body.as_deref(), Some(invite.message.as_str()));
    }

    #[test]
    fn rejects_unusable_public_url() {
        assert!(matches!(
            build_invite("not a url", "alice"),
            Err(ServiceError::Internal(_))
        ));
    }
}
