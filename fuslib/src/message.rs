use xmltree::{Element, EmitterConfig, XMLNode};

use crate::{
    auth::Nonce,
    constants::{CLIENT_PRODUCT, CLIENT_VERSION, DEVICE_PLATFORM, PROTO_VER},
    logic::{filename_check_input, logic_check},
};

/// Extra binary inform fields for regions that the server expects more
/// information about: (region, country code, MCC, MNC)
const REGION_FIELDS: &[(&str, &str, &str, &str)] = &[
    ("EUX", "DE", "262", "01"),
    ("EUY", "RS", "220", "01"),
];

/// A FUS request body. Field order matters to the server, so the fields are
/// kept as an ordered list and written out in exactly that order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProtocolMessage {
    fields: Vec<(&'static str, String)>,
}

impl ProtocolMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, value: impl Into<String>) {
        self.fields.push((name, value.into()));
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    /// Look up the value of a field by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Build the binary inform request, which asks the server about a specific
    /// firmware version.
    pub fn binary_inform(
        version: &str,
        model: &str,
        region: &str,
        device_id: &str,
        nonce: &Nonce,
    ) -> Self {
        let mut msg = Self::new();
        msg.push("ACCESS_MODE", "2");
        msg.push("BINARY_NATURE", "1");
        msg.push("CLIENT_PRODUCT", CLIENT_PRODUCT);
        msg.push("DEVICE_FW_VERSION", version);
        msg.push("DEVICE_LOCAL_CODE", region);
        msg.push("DEVICE_MODEL_NAME", model);
        msg.push("UPGRADE_VARIABLE", "0");
        msg.push("OBEX_SUPPORT", "0");
        msg.push("DEVICE_IMEI_PUSH", device_id);
        msg.push("DEVICE_PLATFORM", DEVICE_PLATFORM);
        msg.push("CLIENT_VERSION", CLIENT_VERSION);
        msg.push("LOGIC_CHECK", logic_check(version, nonce.as_slice()));

        if let Some((_, cc, mcc, mnc)) = REGION_FIELDS.iter().find(|f| f.0 == region) {
            msg.push("DEVICE_AID_CODE", region);
            msg.push("DEVICE_CC_CODE", *cc);
            msg.push("MCC_NUM", *mcc);
            msg.push("MNC_NUM", *mnc);
        }

        msg
    }

    /// Build the binary init request, which must be sent before downloading.
    pub fn binary_init(filename: &str, nonce: &Nonce) -> Self {
        let mut msg = Self::new();
        msg.push("BINARY_FILE_NAME", filename);
        msg.push("LOGIC_CHECK", logic_check(filename_check_input(filename), nonce.as_slice()));
        msg
    }

    fn create_text_node(name: &str, text: &str) -> XMLNode {
        let mut elem = Element::new(name);
        elem.children.push(XMLNode::Text(text.to_owned()));
        XMLNode::Element(elem)
    }

    fn create_data_node(name: &str, value: &str) -> XMLNode {
        let mut elem = Element::new(name);
        elem.children.push(Self::create_text_node("Data", value));
        XMLNode::Element(elem)
    }

    /// Wrap the fields in the `<FUSMsg>` envelope.
    pub fn to_element(&self) -> Element {
        let mut hdr = Element::new("FUSHdr");
        hdr.children.push(Self::create_text_node("ProtoVer", PROTO_VER));

        let mut put = Element::new("Put");
        for (name, value) in &self.fields {
            put.children.push(Self::create_data_node(name, value));
        }

        let mut body = Element::new("FUSBody");
        body.children.push(XMLNode::Element(put));

        let mut msg = Element::new("FUSMsg");
        msg.children.push(XMLNode::Element(hdr));
        msg.children.push(XMLNode::Element(body));

        msg
    }

    /// Serialize to the XML bytes sent as the request body.
    pub fn to_xml(&self) -> Result<Vec<u8>, xmltree::Error> {
        let config = EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(false);

        let mut buf = vec![];
        self.to_element().write_with_config(&mut buf, config)?;

        Ok(buf)
    }
}
