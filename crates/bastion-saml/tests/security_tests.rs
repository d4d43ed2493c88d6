//! Trust, signature, decryption, replay and policy enforcement in
//! `get_claims`.

mod common;

use bastion_saml::claims::claim_types;
use bastion_saml::{
    AudienceRestrictionMode, EntityId, IdentityProvider, Saml2Response, SamlError,
};
use common::*;

#[test]
fn unsigned_response_with_unsigned_assertions_is_rejected() {
    let body = format!(
        "{}{}",
        assertion_xml("a1", "SomeUser"),
        assertion_xml("a2", "SomeUser")
    );
    let xml = response_xml("r1", &body);
    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The SAML Response is not signed and contains unsigned Assertions. Response cannot be trusted."
    );
}

#[test]
fn signed_response_message_is_accepted() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")));
    let claims = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].name_identifier(), Some("SomeUser"));
}

#[test]
fn signed_response_verifies_with_a_secondary_key() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")));

    // The signing key is the second configured one: rollover.
    let mut options = test_options();
    let mut idp = IdentityProvider::new(EntityId::new(IDP_ENTITY_ID));
    idp.allow_unsolicited_authn_response = true;
    idp.add_signing_key(cert(CERT2));
    idp.add_signing_key(cert(CERT1));
    options.add_identity_provider(idp);

    assert!(Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .is_ok());
}

#[test]
fn individually_signed_assertions_are_accepted() {
    let body = format!(
        "{}{}",
        sign(&assertion_xml("a1", "SomeUser")),
        sign(&assertion_xml("a2", "SomeUser2"))
    );
    let xml = response_xml("r1", &body);
    let claims = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap();
    assert_eq!(claims.len(), 2);
    assert_eq!(claims[1].name_identifier(), Some("SomeUser2"));
}

#[test]
fn partially_signed_assertions_are_rejected() {
    let body = format!(
        "{}{}",
        sign(&assertion_xml("a1", "SomeUser")),
        assertion_xml("a2", "SomeUser2")
    );
    let xml = response_xml("r1", &body);
    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert!(err.to_string().contains("unsigned Assertions"));
}

#[test]
fn tampered_assertion_is_rejected() {
    let body = format!(
        "{}{}",
        sign(&assertion_xml("a1", "SomeUser")),
        sign(&assertion_xml("a2", "SomeUser2")).replace("SomeUser2", "SomeOtherUser")
    );
    let xml = response_xml("r1", &body);
    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Signature didn't verify. Have the contents been tampered with?"
    );
}

#[test]
fn assertion_with_a_copied_signature_is_rejected() {
    // Copy the signature block from a validly signed assertion onto a
    // second assertion: classic signature injection.
    let signed = sign(&assertion_xml("a1", "SomeUser"));
    let start = signed.find("<ds:Signature").unwrap();
    let end = signed.find("</ds:Signature>").unwrap() + "</ds:Signature>".len();
    let copied_signature = &signed[start..end];

    let injected = assertion_xml("a2", "SomeUser2").replace(
        "</saml2:Assertion>",
        &format!("{copied_signature}</saml2:Assertion>"),
    );
    let xml = response_xml("r1", &format!("{signed}{injected}"));

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Incorrect reference on Xml signature. The reference must be to the root element of the element containing the signature."
    );
}

#[test]
fn tampered_response_keeps_reporting_the_signature_failure() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")))
        .replace("2013-01-01", "2015-01-01");
    let response = Saml2Response::read(&xml, None).unwrap();
    let options = test_options();

    let first = response.get_claims(&options).unwrap_err();
    assert!(matches!(first, SamlError::InvalidSignature { .. }));

    // The outcome is cached: no replay error can mask the signature
    // failure on a second attempt.
    let second = response.get_claims(&options).unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn get_claims_is_idempotent_without_replay_side_effects() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")));
    let response = Saml2Response::read(&xml, None).unwrap();
    let options = test_options();

    let first = response.get_claims(&options).unwrap();
    let second = response.get_claims(&options).unwrap();
    assert_eq!(first, second);
    assert_eq!(options.replay_cache().len(), 1);
}

#[test]
fn replayed_assertion_id_is_rejected_under_the_same_options() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")));
    let options = test_options();

    Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap();

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap_err();
    match err {
        SamlError::ReplayDetected { assertion_id } => assert_eq!(assertion_id, "a1"),
        other => panic!("wrong error: {other:?}"),
    }
}

#[test]
fn replay_scope_is_tied_to_the_options_instance() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")));

    Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap();
    // A different Options instance owns a different replay cache.
    Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap();
}

#[test]
fn unsolicited_response_is_rejected_when_disallowed() {
    let xml = sign(&response_from(IDP2_ENTITY_ID, "Requester", "r1", None, ""));
    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Unsolicited responses are not allowed for idp \"https://idp2.example.com\"."
    );
}

#[test]
fn unsolicited_response_is_accepted_when_allowed() {
    let xml = sign(&response_from(IDP_ENTITY_ID, "Success", "r1", None, ""));
    assert!(Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .is_ok());
}

#[test]
fn unknown_issuer_is_rejected() {
    let xml = sign(&response_from(
        "https://unknown.example.com",
        "Success",
        "r1",
        None,
        "",
    ));
    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert!(err.to_string().contains("not a known identity provider"));
}

#[test]
fn expired_assertion_is_rejected() {
    let body = assertion_xml("a1", "SomeUser")
        .replace("2100-01-01T00:00:00Z", "2013-06-30T08:00:00Z");
    let xml = sign(&response_xml("r1", &body));
    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert!(err.to_string().contains("expired"));
}

#[test]
fn wrong_audience_is_rejected_when_mode_is_always() {
    let body = assertion_xml("a1", "SomeUser").replace(
        "<saml2:Conditions NotOnOrAfter=\"2100-01-01T00:00:00Z\"/>",
        "<saml2:Conditions NotOnOrAfter=\"2100-01-01T00:00:00Z\"><saml2:AudienceRestriction><saml2:Audience>https://example.com/wrong/audience</saml2:Audience></saml2:AudienceRestriction></saml2:Conditions>",
    );
    let xml = sign(&response_xml("r1", &body));

    let mut options = test_options();
    options.sp.audience_restriction = AudienceRestrictionMode::Always;

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap_err();
    match err {
        SamlError::AudienceValidationFailed { audiences } => {
            assert_eq!(audiences, vec!["https://example.com/wrong/audience"]);
        }
        other => panic!("wrong error: {other:?}"),
    }
}

#[test]
fn wrong_audience_is_ignored_when_mode_is_never() {
    let body = assertion_xml("a1", "SomeUser").replace(
        "<saml2:Conditions NotOnOrAfter=\"2100-01-01T00:00:00Z\"/>",
        "<saml2:Conditions NotOnOrAfter=\"2100-01-01T00:00:00Z\"><saml2:AudienceRestriction><saml2:Audience>https://example.com/wrong/audience</saml2:Audience></saml2:AudienceRestriction></saml2:Conditions>",
    );
    let xml = sign(&response_xml("r1", &body));

    let mut options = test_options();
    options.sp.audience_restriction = AudienceRestrictionMode::Never;

    assert!(Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .is_ok());
}

#[test]
fn matching_audience_is_accepted() {
    let body = assertion_xml("a1", "SomeUser").replace(
        "<saml2:Conditions NotOnOrAfter=\"2100-01-01T00:00:00Z\"/>",
        &format!("<saml2:Conditions NotOnOrAfter=\"2100-01-01T00:00:00Z\"><saml2:AudienceRestriction><saml2:Audience>{SP_ENTITY_ID}</saml2:Audience></saml2:AudienceRestriction></saml2:Conditions>"),
    );
    let xml = sign(&response_xml("r1", &body));

    let mut options = test_options();
    options.sp.audience_restriction = AudienceRestrictionMode::Always;

    assert!(Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .is_ok());
}

#[test]
fn certificate_validation_rejects_self_signed_idp_certificates() {
    let xml = sign(&response_xml("r1", &assertion_xml("a1", "SomeUser")));

    let mut options = test_options();
    options.sp.validate_certificates = true;

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The signature was valid, but the verification of the certificate failed. Is it expired or revoked? Are you sure you really want to enable ValidateCertificates (it's normally not needed)?"
    );
}

#[test]
fn encrypted_assertion_in_signed_response_is_decrypted() {
    let encrypted = encrypt_assertion(
        &assertion_xml("a1", "UserIDInsideEncryptedAssertion"),
        &service_credentials().certificate,
        false,
    );
    let xml = sign(&response_xml("r1", &encrypted));

    let mut options = test_options();
    options.sp.service_certificates.push(service_credentials());

    let claims = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(
        claims[0].name_identifier(),
        Some("UserIDInsideEncryptedAssertion")
    );
}

#[test]
fn encrypted_signed_assertion_is_accepted_without_response_signature() {
    let encrypted = encrypt_assertion(
        &sign(&assertion_xml("a1", "SomeUser")),
        &service_credentials().certificate,
        false,
    );
    let xml = response_xml("r1", &encrypted);

    let mut options = test_options();
    options.sp.service_certificates.push(service_credentials());

    let claims = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap();
    assert_eq!(claims[0].name_identifier(), Some("SomeUser"));
}

#[test]
fn encrypted_assertion_with_oaep_key_transport_is_decrypted() {
    let encrypted = encrypt_assertion(
        &sign(&assertion_xml("a1", "SomeUser")),
        &service_credentials().certificate,
        true,
    );
    let xml = response_xml("r1", &encrypted);

    let mut options = test_options();
    options.sp.service_certificates.push(service_credentials());

    assert!(Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .is_ok());
}

#[test]
fn encrypted_unsigned_assertion_in_unsigned_response_is_rejected() {
    let encrypted = encrypt_assertion(
        &assertion_xml("a1", "SomeUser"),
        &service_credentials().certificate,
        false,
    );
    let xml = response_xml("r1", &encrypted);

    let mut options = test_options();
    options.sp.service_certificates.push(service_credentials());

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap_err();
    assert!(err.to_string().contains("unsigned Assertions"));
}

#[test]
fn tampered_signature_inside_encrypted_assertion_is_rejected() {
    let tampered = sign(&assertion_xml("a1", "SomeUser")).replace("SomeUser", "AnotherUser");
    let encrypted = encrypt_assertion(&tampered, &service_credentials().certificate, false);
    let xml = response_xml("r1", &encrypted);

    let mut options = test_options();
    options.sp.service_certificates.push(service_credentials());

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap_err();
    assert!(err.to_string().contains("tampered"));
}

#[test]
fn undecryptable_assertion_fails_with_the_decryption_message() {
    // Encrypted for certificate 2, but only certificate 1 is configured.
    let encrypted = encrypt_assertion(
        &assertion_xml("a1", "SomeUser"),
        &service_credentials().certificate,
        false,
    );
    let xml = sign(&response_xml("r1", &encrypted));

    let mut options = test_options();
    options.sp.service_certificates.push(idp_credentials());

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&options)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Encrypted Assertion(s) could not be decrypted using the configured Service Certificate(s)."
    );
}

#[test]
fn encrypted_assertion_without_service_certificates_is_rejected() {
    let encrypted = encrypt_assertion(
        &assertion_xml("a1", "SomeUser"),
        &service_credentials().certificate,
        false,
    );
    let xml = sign(&response_xml("r1", &encrypted));

    let err = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap_err();
    assert!(matches!(err, SamlError::ValidationFailed { .. }));
}

#[test]
fn logout_name_identifier_carries_all_name_id_properties() {
    let body = assertion_xml("a1", "someone@example.com")
        .replace(
            "<saml2:NameID>",
            "<saml2:NameID NameQualifier=\"NameQualifier\" SPNameQualifier=\"SPNameQualifier\" Format=\"urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress\" SPProvidedID=\"SPProvidedID\">",
        )
        .replace(
            "</saml2:Subject>",
            "</saml2:Subject><saml2:AuthnStatement AuthnInstant=\"2013-09-25T00:00:00Z\" SessionIndex=\"17\"><saml2:AuthnContext><saml2:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml2:AuthnContextClassRef></saml2:AuthnContext></saml2:AuthnStatement>",
        );
    let xml = sign(&response_xml("r1", &body));

    let claims = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap();
    let logout = claims[0]
        .find_first(claim_types::LOGOUT_NAME_IDENTIFIER)
        .expect("logout name identifier claim should be generated");
    assert_eq!(
        logout.value,
        "NameQualifier,SPNameQualifier,urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress,SPProvidedID,someone@example.com"
    );
}

#[test]
fn logout_name_identifier_keeps_empty_slots() {
    let body = assertion_xml("a1", "SomeOne").replace(
        "</saml2:Subject>",
        "</saml2:Subject><saml2:AuthnStatement AuthnInstant=\"2013-09-25T00:00:00Z\" SessionIndex=\"17\"><saml2:AuthnContext><saml2:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml2:AuthnContextClassRef></saml2:AuthnContext></saml2:AuthnStatement>",
    );
    let xml = sign(&response_xml("r1", &body));

    let claims = Saml2Response::read(&xml, None)
        .unwrap()
        .get_claims(&test_options())
        .unwrap();
    assert_eq!(
        claims[0]
            .find_first(claim_types::LOGOUT_NAME_IDENTIFIER)
            .unwrap()
            .value,
        ",,,,SomeOne"
    );
    assert_eq!(
        claims[0].find_first(claim_types::SESSION_INDEX).unwrap().value,
        "17"
    );
}

#[test]
fn session_not_on_or_after_is_the_minimum_across_assertions() {
    let first = assertion_xml("a1", "SomeUser").replace(
        "</saml2:Subject>",
        "</saml2:Subject><saml2:AuthnStatement AuthnInstant=\"2013-09-25T00:00:00Z\" SessionNotOnOrAfter=\"2050-01-01T00:00:00Z\"><saml2:AuthnContext><saml2:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml2:AuthnContextClassRef></saml2:AuthnContext></saml2:AuthnStatement>",
    );
    let second = assertion_xml("a2", "SomeOtherUser").replace(
        "</saml2:Subject>",
        "</saml2:Subject><saml2:AuthnStatement AuthnInstant=\"2013-09-25T00:00:00Z\" SessionNotOnOrAfter=\"2051-01-01T00:00:00Z\"><saml2:AuthnContext><saml2:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml2:AuthnContextClassRef></saml2:AuthnContext></saml2:AuthnStatement>",
    );
    let xml = sign(&response_xml("r1", &format!("{first}{second}")));

    let response = Saml2Response::read(&xml, None).unwrap();
    response.get_claims(&test_options()).unwrap();

    let expected = chrono::DateTime::parse_from_rfc3339("2050-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    assert_eq!(response.session_not_on_or_after().unwrap(), Some(expected));
}
